use log::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
  #[error("Transport error: {0}")]
  Transport(String),
}

#[derive(Clone, Debug)]
pub struct Email {
  pub to: String,
  pub subject: String,
  pub body: String,
}

/// Outbound mail seam. The actual SMTP transport is an external collaborator;
/// the core only ever talks to this enum. The default transport logs the
/// message, which doubles as the documented behavior for one-time secrets in
/// dev setups.
#[derive(Clone, Default)]
pub enum Mailer {
  #[default]
  Log,
  #[cfg(test)]
  Memory(std::sync::Arc<parking_lot::Mutex<Vec<Email>>>),
}

impl Mailer {
  pub async fn send(&self, email: Email) -> Result<(), EmailError> {
    match self {
      Self::Log => {
        info!(
          "email to={to} subject={subject:?}: {body}",
          to = email.to,
          subject = email.subject,
          body = email.body
        );
      }
      #[cfg(test)]
      Self::Memory(outbox) => {
        outbox.lock().push(email);
      }
    }
    return Ok(());
  }

  #[cfg(test)]
  pub(crate) fn new_for_test() -> (Self, std::sync::Arc<parking_lot::Mutex<Vec<Email>>>) {
    let outbox = std::sync::Arc::new(parking_lot::Mutex::new(vec![]));
    return (Self::Memory(outbox.clone()), outbox);
  }
}
