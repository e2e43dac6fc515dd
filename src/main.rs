fn main() -> eframe::Result {
    video_annotator::run_native()
}
