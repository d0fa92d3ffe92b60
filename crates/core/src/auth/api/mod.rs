pub(crate) mod change_password;
pub(crate) mod login;
pub(crate) mod refresh;
pub(crate) mod register;
pub(crate) mod reset_password;
pub(crate) mod verify_email;
