#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

use std::{error::Error, net::Ipv4Addr, path::Path};

use clap::{crate_version, Arg, ArgMatches, Command};
use serde_json::json;
use slog::info;

use ad_selector::{
    configuration,
    store::{load_snapshot, SelectorStore},
    Environment, Selector,
};
use primitives::{
    util::logging::new_logger, Country, GroupCaps, Lang, SelectionContext, SlotId,
};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Command::new("Ad selector")
        .version(crate_version!())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("the config file for the selector")
                .takes_value(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("dump")
                .about("prints a selector snapshot, the cached one by default")
                .arg(Arg::new("snapshot").help("path to the snapshot").takes_value(true)),
        )
        .subcommand(
            Command::new("caps")
                .about("decodes a capping token to JSON")
                .arg(Arg::new("token").required(true).takes_value(true)),
        )
        .subcommand(
            Command::new("select")
                .about("runs one selection against a snapshot")
                .arg(
                    Arg::new("snapshot")
                        .help("path to the snapshot")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::new("page")
                        .long("page")
                        .short('p')
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::new("slot")
                        .long("slot")
                        .short('s')
                        .help("slots to fill, in order")
                        .takes_value(true)
                        .multiple_occurrences(true),
                )
                .arg(Arg::new("adCaps").long("ad-caps").takes_value(true))
                .arg(Arg::new("counterCaps").long("counter-caps").takes_value(true))
                .arg(Arg::new("country").long("country").takes_value(true))
                .arg(Arg::new("lang").long("lang").takes_value(true))
                .arg(Arg::new("ip").long("ip").takes_value(true))
                .arg(
                    Arg::new("pageSource")
                        .long("page-source")
                        .takes_value(true)
                        .multiple_occurrences(true),
                )
                .arg(
                    Arg::new("category")
                        .long("category")
                        .takes_value(true)
                        .multiple_occurrences(true),
                )
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .takes_value(true)
                        .multiple_occurrences(true),
                ),
        )
        .get_matches();

    let environment: Environment = match std::env::var("ENV") {
        Ok(env) => serde_json::from_value(serde_json::Value::String(env))?,
        Err(_) => Environment::default(),
    };
    let config = configuration(environment, cli.value_of("config"))?;

    let logger = new_logger("ad-selector");

    match cli.subcommand() {
        Some(("dump", args)) => {
            let selector = match args.value_of("snapshot") {
                Some(path) => read_snapshot(path)?,
                None => SelectorStore::open(&config, logger.clone())
                    .current()
                    .as_ref()
                    .clone(),
            };

            print!("{}", selector);
        }
        Some(("caps", args)) => {
            let token = args.value_of("token").unwrap_or_default();
            let caps = GroupCaps::try_from_token(token)?;

            println!("{}", serde_json::to_string_pretty(&caps)?);
        }
        Some(("select", args)) => {
            let selector = read_snapshot(args.value_of("snapshot").unwrap_or_default())?;
            let mut context = selection_context(args)?;

            info!(logger, "Selecting"; "update_number" => selector.update_number, "page" => context.page);

            let result = selector.select(&mut context);
            let output = json!({
                "ads": result.ads,
                "counters": result.counters,
                "adCaps": result.ad_caps.to_token()?,
                "counterCaps": result.counter_caps.to_token()?,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => unreachable!("a subcommand is required"),
    }

    Ok(())
}

fn read_snapshot(path: &str) -> Result<Selector, Box<dyn Error>> {
    load_snapshot(Path::new(path))?.ok_or_else(|| format!("No snapshot at {}", path).into())
}

fn selection_context(args: &ArgMatches) -> Result<SelectionContext, Box<dyn Error>> {
    let page = args.value_of("page").unwrap_or_default().parse()?;
    let slots = args
        .values_of("slot")
        .into_iter()
        .flatten()
        .map(str::parse)
        .collect::<Result<Vec<SlotId>, _>>()?;

    let mut context = SelectionContext::new(page).with_slots(slots);
    context.randomize(&mut rand::thread_rng());
    context.load_caps(args.value_of("adCaps"), args.value_of("counterCaps"));

    if let Some(country) = args.value_of("country") {
        context.country = Some(country.parse::<Country>()?);
    }

    if let Some(lang) = args.value_of("lang") {
        context.language = Some(lang.parse::<Lang>()?);
    }

    if let Some(ip) = args.value_of("ip") {
        context.set_ip(ip.parse::<Ipv4Addr>()?);
    }

    for source in args.values_of("pageSource").into_iter().flatten() {
        context.add_page_source(source);
    }

    for category in args.values_of("category").into_iter().flatten() {
        context.add_page_category(category);
    }

    for tag in args.values_of("tag").into_iter().flatten() {
        context.add_tag(tag);
    }

    Ok(context)
}
