mod check;
mod discover;
mod download;
mod generate;
mod http;
mod parser;
mod records;
mod registry;
mod scrape;
mod settings;
mod sitemap;

use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use settings::Settings;

#[derive(Parser)]
#[command(name = "eyecandy_harvester", about = "WebP video harvester for eyecannndy.com")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl index pages and build the technique link registry
    Discover {
        /// Look for sub-categories on every technique page, not just the configured ones
        #[arg(long)]
        all: bool,
        /// Also register technique URLs from sitemap.xml
        #[arg(long)]
        sitemap: bool,
    },
    /// Extract WebP references from technique pages
    Scrape {
        /// Max pages to scrape (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Only scrape these techniques
        #[arg(short, long = "technique")]
        techniques: Vec<String>,
        /// Continue from the last checkpoint
        #[arg(long)]
        resume: bool,
    },
    /// Write per-technique JSON/CSV files and the summary manifest
    Generate,
    /// Download videos listed in the technique files
    Download {
        /// Max videos to consider (0 = unlimited)
        #[arg(long, default_value = "0")]
        max: usize,
        /// Only download these techniques
        #[arg(short, long = "technique")]
        techniques: Vec<String>,
    },
    /// Discover + scrape + generate in one go
    Run {
        /// Max pages to scrape
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Download videos afterwards
        #[arg(long)]
        download: bool,
    },
    /// Audit technique files for duplicates and CSV/JSON drift
    Check,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    info!(
        "Target {} (data: {:?}, techniques: {:?}, videos: {:?})",
        settings.base_url, settings.data_dir, settings.technique_dir, settings.videos_dir
    );

    let result = match cli.command {
        Commands::Discover { all, sitemap } => {
            discover_cmd(&settings, all, sitemap)?;
            Ok(())
        }
        Commands::Scrape {
            limit,
            techniques,
            resume,
        } => scrape_cmd(
            &settings,
            &scrape::ScrapeOptions {
                limit,
                techniques,
                resume,
            },
        ),
        Commands::Generate => generate_cmd(&settings),
        Commands::Download { max, techniques } => {
            download_cmd(&settings, &download::DownloadOptions { max, techniques })
        }
        Commands::Run { limit, download } => {
            let t_phase = Instant::now();
            discover_cmd(&settings, false, false)?;
            println!("Discovery took {:.1}s", t_phase.elapsed().as_secs_f64());

            let t_phase = Instant::now();
            scrape_cmd(
                &settings,
                &scrape::ScrapeOptions {
                    limit,
                    techniques: Vec::new(),
                    resume: false,
                },
            )?;
            println!("Scraping took {}", format_duration(t_phase.elapsed()));

            generate_cmd(&settings)?;
            if download {
                download_cmd(
                    &settings,
                    &download::DownloadOptions {
                        max: 0,
                        techniques: Vec::new(),
                    },
                )?;
            }
            Ok(())
        }
        Commands::Check => {
            let report = check::run(&settings)?;
            println!("Files:               {}", report.files);
            println!("URLs:                {}", report.total_urls);
            println!("Duplicates in file:  {}", report.duplicates_within.len());
            println!("Shared across files: {}", report.shared_across.len());
            println!("CSV/JSON mismatches: {}", report.inconsistent.len());
            println!("Missing from raw:    {}", report.missing_from_raw.len());
            println!("Unreadable:          {}", report.unreadable.len());
            if !report.empty.is_empty() {
                println!("\n--- Empty techniques ({}) ---", report.empty.len());
                for name in &report.empty {
                    println!("  {}", name);
                }
            }
            if report.is_clean() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} problems found", report.problems()))
            }
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn discover_cmd(settings: &Settings, all: bool, sitemap: bool) -> anyhow::Result<()> {
    let (_, stats) = discover::run(
        settings,
        &discover::DiscoverOptions {
            all_sub_categories: all,
            sitemap,
        },
    )?;
    println!(
        "Discovered {} techniques and {} sub-categories ({} pages failed).",
        stats.techniques, stats.sub_categories, stats.failed_pages
    );
    Ok(())
}

fn scrape_cmd(settings: &Settings, opts: &scrape::ScrapeOptions) -> anyhow::Result<()> {
    let stats = scrape::run(settings, opts)?;
    println!(
        "Scraped {} pages ({} ok, {} errors): {} new videos, {} total.",
        stats.pages, stats.ok, stats.errors, stats.new_videos, stats.total_videos
    );
    Ok(())
}

fn generate_cmd(settings: &Settings) -> anyhow::Result<()> {
    let stats = generate::run(settings)?;
    println!(
        "Wrote {} technique files to {:?}: {} with videos, {} empty, {} videos total.",
        stats.total_techniques,
        stats.output_dir,
        stats.with_data,
        stats.without_data,
        stats.total_videos
    );
    Ok(())
}

fn download_cmd(settings: &Settings, opts: &download::DownloadOptions) -> anyhow::Result<()> {
    let stats = download::run(settings, opts)?;
    println!("Considered: {}", stats.considered);
    println!("Downloaded: {}", stats.downloaded);
    println!("Skipped:    {}", stats.skipped);
    println!("Failed:     {}", stats.failed);
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
