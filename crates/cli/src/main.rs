use log::*;

use bunbase::Config;

/// All configuration comes from the environment (BUNBASE_PORT,
/// BUNBASE_DATA_DIR, BUNBASE_STORAGE_DIR, BUNBASE_JWT_SECRET,
/// BUNBASE_ADMIN_PASSWORD, BUNBASE_DEV).
#[tokio::main]
async fn main() {
  env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

  let config = match Config::from_env() {
    Ok(config) => config,
    Err(err) => {
      error!("{err}");
      std::process::exit(1);
    }
  };

  if let Err(err) = bunbase::serve(config).await {
    error!("{err}");
    std::process::exit(1);
  }
}
