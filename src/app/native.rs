use std::path::{Path, PathBuf};

use eframe::egui;
use log::info;

use crate::config::Config;

use super::VideoAnnotatorApp;

pub fn run_native() -> Result<(), eframe::Error> {
    env_logger::init();

    let config = Config::load(Path::new("config.json"))
        .map_err(|e| eframe::Error::AppCreation(Box::new(e)))?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size(config.egui.viewport),
        ..Default::default()
    };

    let video_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.video_path.clone())
        .unwrap_or_else(|| ".".into());

    info!("Run with config: {config:?}, video: {video_path:?}");
    eframe::run_native(
        "Video Annotator",
        options,
        Box::new(move |cc| {
            let app = VideoAnnotatorApp::new(cc, &config, &video_path)
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            Ok(Box::new(app))
        }),
    )
}
