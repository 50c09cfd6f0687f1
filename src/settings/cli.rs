use super::Parser;
use crate::logger::LogFormat;

#[derive(Parser, Debug)]
pub struct Cli {
    #[arg(long)]
    pub settings: Option<String>,

    /// Log JSON lines instead of plain text.
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Plain
        }
    }
}
