use clap::Args;
use keystone::KeystoneConfig;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Print the configuration as JSON
    #[clap(long)]
    pub json: bool,
}

pub fn run(config: &KeystoneConfig, config_path: &Option<String>, args: ConfigArgs) {
    let ConfigArgs { json } = args;

    let config_file = config_path
        .clone()
        .unwrap_or_else(KeystoneConfig::config_file_path);

    if json {
        let mut masked = config.clone();
        if masked.database.args.get("password").is_some() {
            masked.database.args.insert("password", "********");
        }
        let value = serde_json::json!({
            "config_file": config_file,
            "config": masked,
        });
        match serde_json::to_string_pretty(&value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("ERROR: Failed to serialize to JSON: {}", e),
        }
        return;
    }

    println!("Config File:        {}", config_file);
    println!("{}", config.summary());
}
