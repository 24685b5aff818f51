use clap::Parser;
use dleecher::{
    config::cfg::Cfg, torrent_handler::handler::TorrentHandler,
    torrent_parser::parser::TorrentParser,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    file: String,
    #[arg(short, long)]
    config: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    // Reads the filepath from the command line argument (Check README)
    let args = Args::parse();
    let file_path = PathBuf::from(args.file.trim());
    let config_path = args.config.trim();

    let parsed = TorrentParser::parse(&file_path).expect("parser could not find the file");
    let config = Cfg::new(config_path).expect("Config file not found or incomplete");
    let progress_interval = Duration::from_secs(config.progress_seconds_interval);

    let mut handler =
        TorrentHandler::new(parsed, config).expect("Failed to initialize the torrent");

    println!("Starting download ...");
    handler.start().expect("Failed to start the download");

    let mut last_progress = Instant::now();
    while !handler.is_finished() {
        handler.message();

        if last_progress.elapsed() >= progress_interval {
            println!("{}", handler.status_line());
            last_progress = Instant::now();
        }
        thread::sleep(Duration::from_millis(1));
    }

    println!("{}", handler.status_line());
    handler.stop();
}
