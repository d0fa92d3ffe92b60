use std::sync::atomic::{AtomicBool, Ordering};

mod init;

pub use init::{InitError, build_router, init_app_state, serve};

#[cfg(test)]
pub(crate) use init::bootstrap_admin;

// Whether verbatim internal error messages may be returned to clients.
// Written once at startup.
static DEV_MODE: AtomicBool = AtomicBool::new(false);

pub(crate) fn dev_mode() -> bool {
  return DEV_MODE.load(Ordering::Relaxed);
}

pub(crate) fn set_dev_mode(enabled: bool) {
  DEV_MODE.store(enabled, Ordering::Relaxed);
}
