use std::env;
use std::path::PathBuf;
use xr_cubes::config::AppConfig;

fn main() {
    env_logger::init();
    match run() {
        Ok(restart) if restart => {
            log::warn!("[main] runtime lost, restart requested");
            std::process::exit(2);
        }
        Ok(_) => {}
        Err(err) => {
            log::error!("[main] {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::resolve(config_path.as_deref())?;
    let control = xr_cubes::run(&config)?;
    Ok(control.request_restart)
}
