mod config_cmd;
mod relay;
mod show;

pub use config_cmd::ConfigCommand;
pub use relay::RelayCommand;
pub use show::ShowCommand;
