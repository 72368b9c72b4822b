pub mod support;

pub mod dialogs;
pub mod history;
pub mod settle;
