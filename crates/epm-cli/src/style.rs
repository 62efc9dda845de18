use std::env;

use color_eyre::owo_colors::OwoColorize;

use crate::commands::Status;

pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(force_no_color: bool, is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !(force_no_color || env_no_color) && is_tty,
        }
    }

    pub fn status(&self, status: Status, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        match status {
            Status::Ok => text.green().bold().to_string(),
            Status::UserError => text.yellow().bold().to_string(),
            Status::Failure => text.red().bold().to_string(),
        }
    }
}
