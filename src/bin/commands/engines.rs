use clap::Args;
use keystone::Engine;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Arguments for the Engines command
#[derive(Args)]
pub struct EnginesArgs {
    /// Only list engines whose driver is compiled in
    #[clap(short, long)]
    pub available: bool,
}

#[derive(Tabled)]
struct EngineInfo {
    engine: String,
    tags: String,
    placeholder: &'static str,
    available: bool,
}

pub fn run(args: EnginesArgs) {
    let engines = match args.available {
        true => Engine::available(),
        false => Engine::ALL.to_vec(),
    };

    let rows: Vec<EngineInfo> = engines
        .into_iter()
        .map(|e| EngineInfo {
            engine: e.to_string(),
            tags: e.tags().join(", "),
            placeholder: match e.placeholder_style() {
                keystone::PlaceholderStyle::QuestionMark => "?",
                keystone::PlaceholderStyle::Numbered => "$1",
            },
            available: e.is_available(),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
}
