use std::{error::Error, path::PathBuf, process};

use clap::{Parser, Subcommand};
use tracing::{error, info};

use districtmap::{
    logging::init_logging, ApiReply, ChoroplethService, Config,
};

#[derive(Parser)]
#[command(name = "districtmap")]
#[command(about = "Per-district choropleth maps from uploaded measurement tables")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the district menu for the configured region
    Districts {
        #[arg(long, default_value = "districtmap.toml")]
        config: PathBuf,
    },
    /// Apply uploads, then write the map document for one metric
    Render {
        #[arg(long, default_value = "districtmap.toml")]
        config: PathBuf,
        /// Upload as METRIC:DISTRICT:CSV_PATH; may be repeated
        #[arg(long = "upload", value_parser = parse_upload)]
        uploads: Vec<UploadArg>,
        /// Metric or composite id to render
        #[arg(long)]
        metric: Option<String>,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
struct UploadArg {
    metric: String,
    district: String,
    path: PathBuf,
}

fn parse_upload(s: &str) -> Result<UploadArg, String> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(metric), Some(district), Some(path))
            if !metric.is_empty() && !district.is_empty() && !path.is_empty() =>
        {
            Ok(UploadArg {
                metric: metric.to_owned(),
                district: district.to_owned(),
                path: PathBuf::from(path),
            })
        }
        _ => Err(format!("expected METRIC:DISTRICT:CSV_PATH, got '{}'", s)),
    }
}

// Replies go to stderr so a map on stdout stays clean.
fn print_reply(reply: &ApiReply) {
    eprintln!("{} {}", reply.status, reply.body);
}

fn districts(config: &Config) -> Result<(), Box<dyn Error>> {
    let service = ChoroplethService::start(config)?;
    for entry in service.registry().entries() {
        println!("{}", entry.display);
    }
    Ok(())
}

fn render(
    config: &Config,
    uploads: &[UploadArg],
    metric: Option<String>,
    out: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let service = ChoroplethService::start(config)?;

    // A rejected upload is reported and the rest still run.
    for upload in uploads {
        let reply = service.handle_upload_file(&upload.metric, &upload.district, &upload.path);
        eprint!("upload {}: ", upload.path.display());
        print_reply(&reply);
    }

    let metric = metric
        .or_else(|| uploads.last().map(|u| u.metric.clone()))
        .or_else(|| config.classification.metrics.first().map(|m| m.id.clone()))
        .ok_or("no metric to render")?;

    let reply = service.handle_map_data(&metric);
    if reply.status != 200 {
        print_reply(&reply);
        return Err(format!("map request for '{}' failed", metric).into());
    }

    let document = serde_json::to_string_pretty(&reply.body)?;
    match out {
        Some(path) => {
            std::fs::write(&path, document)?;
            info!("Wrote {} map to {}", metric, path.display());
        }
        None => println!("{}", document),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Districts { config } => districts(&Config::load(config)?),
        Commands::Render {
            config,
            uploads,
            metric,
            out,
        } => render(&Config::load(config)?, &uploads, metric, out),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    if let Err(err) = run(cli) {
        error!("{}", err);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_argument_splits_on_first_two_colons() {
        let arg = parse_upload("temperature:Çankaya:C:/data/t.csv").unwrap();
        assert_eq!(arg.metric, "temperature");
        assert_eq!(arg.district, "Çankaya");
        assert_eq!(arg.path, PathBuf::from("C:/data/t.csv"));
        assert!(parse_upload("temperature:Çankaya").is_err());
        assert!(parse_upload("::x.csv").is_err());
    }
}
