use clap::Parser;
use ffmpeg_rs_raw::ffmpeg_sys_the_third::av_version_info;
use log::info;
use pktav_transcoder::settings::Settings;
use pktav_transcoder::supervisor;
use std::ffi::CStr;

#[derive(Parser, Debug)]
#[command(version, about = "Local transcoding worker supervisor")]
struct Args {}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let _args = Args::parse();

    unsafe {
        info!(
            "FFMPEG version={}",
            CStr::from_ptr(av_version_info()).to_str().unwrap()
        );
    }

    let settings = Settings::from_env();
    supervisor::run(&settings)
}
