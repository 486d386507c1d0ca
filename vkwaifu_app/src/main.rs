//! vkwaifu: present one image full-screen until the window is closed
//!
//! Exit codes: 0 on a clean close, 1 when the image or the GPU setup fails, 2 on bad
//! arguments, 3 on a fatal Vulkan fault while running.

mod cli;

use std::process::ExitCode;
use vkwaifu_engine::foundation::logging;

fn main() -> ExitCode {
    let args = cli::parse();
    logging::init();

    let config = args.presenter_config();
    logging::debug!("Starting with {:?}", config);

    match vkwaifu_engine::run(&config, &args.image) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_fatal() {
                logging::error!("Fatal: {}", e);
            } else {
                logging::error!("{}", e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}
