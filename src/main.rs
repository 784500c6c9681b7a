#[macro_use]
extern crate slog;

use anyhow::{Context, Result};
use clap::{App, Arg, ArgMatches};
use etcd_bootstrap::{
    bootstrap::{self, Bootstrapper},
    etcd::EtcdCluster,
    inventory::{CloudInventory, StaticInventory},
    logging::{self, LogFormat},
};
use std::{path::PathBuf, time::Duration};

const DEFAULT_OUTPUT: &str = "/var/run/etcd-bootstrap.conf";

fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("etcd-bootstrap")
        .version("0.1")
        .about("generates the etcd environment for this instance, joining or founding the cluster")
        .arg(
            Arg::with_name("inventory")
                .long("inventory")
                .value_name("PATH")
                .help("a toml file listing the instances that should make up the cluster")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("instance-id")
                .long("instance-id")
                .value_name("ID")
                .help("the id of this instance in the inventory, if the inventory doesn't say")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("etcd-endpoint")
                .long("etcd-endpoint")
                .value_name("URL")
                .help("an etcd client url to manage membership through (defaults to every instance)")
                .multiple(true)
                .number_of_values(1)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("etcd-timeout")
                .long("etcd-timeout")
                .value_name("SECONDS")
                .help("the timeout for each request to etcd")
                .default_value("5")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("output")
                .long("output")
                .short("o")
                .value_name("PATH")
                .help("where to write the etcd environment")
                .default_value(DEFAULT_OUTPUT)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .possible_values(&["term", "json"])
                .default_value("term")
                .takes_value(true),
        )
}

#[derive(Debug, PartialEq)]
struct Config {
    inventory_path: PathBuf,
    instance_id: Option<String>,
    etcd_endpoints: Vec<String>,
    etcd_timeout: Duration,
    output_path: PathBuf,
    log_format: LogFormat,
}

impl Config {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            inventory_path: matches
                .value_of("inventory")
                .expect("this argument is required")
                .into(),
            instance_id: matches.value_of("instance-id").map(str::to_string),
            etcd_endpoints: matches
                .values_of("etcd-endpoint")
                .into_iter()
                .flatten()
                .map(str::to_string)
                .collect(),
            etcd_timeout: Duration::from_secs(
                matches
                    .value_of("etcd-timeout")
                    .expect("this argument has a default")
                    .parse()
                    .with_context(|| "invalid etcd timeout")?,
            ),
            output_path: matches
                .value_of("output")
                .expect("this argument has a default")
                .into(),
            log_format: matches
                .value_of("log-format")
                .expect("this argument has a default")
                .parse()?,
        })
    }
}

fn run(logger: &slog::Logger, config: &Config) -> Result<()> {
    let inventory = StaticInventory::load(&config.inventory_path, config.instance_id.as_deref())
        .with_context(|| format!("unable to load {}", config.inventory_path.display()))?;
    info!(logger, "loaded inventory";
        "instances" => inventory.instances().len(),
        "local" => inventory.local_instance().id);

    let endpoints = if config.etcd_endpoints.is_empty() {
        inventory.instances().iter().map(|i| i.client_url()).collect()
    } else {
        config.etcd_endpoints.clone()
    };
    let cluster = EtcdCluster::new(
        logger.new(o!("component" => "etcd")),
        endpoints,
        config.etcd_timeout,
    )
    .with_context(|| "unable to create etcd client")?;

    let flags = Bootstrapper::new(
        logger.new(o!("component" => "bootstrap")),
        &inventory,
        &cluster,
    )
    .generate_flags()
    .with_context(|| "unable to bootstrap etcd flags")?;

    info!(logger, "writing environment variables to {}", config.output_path.display());
    bootstrap::write_flags_file(&config.output_path, &flags)?;
    Ok(())
}

fn main() {
    let matches = app().get_matches();
    let config = match Config::from_matches(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    };

    let code = {
        let (logger, _guard) = logging::root_logger(config.log_format);
        exit_code(&logger, run(&logger, &config))
    };
    std::process::exit(code);
}

/// Logs a fatal error, if there is one, and returns the exit code for the process.
fn exit_code(logger: &slog::Logger, result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            crit!(logger, "{:#}", e);
            1
        }
    }
}
