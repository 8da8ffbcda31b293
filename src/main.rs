use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck::{config, FaceService};
use log::info;

#[derive(Parser)]
#[command(name = "facecheck")]
#[command(version, about = "Student face enrollment and identification")]
struct Cli {
    /// Config file (defaults to the installed location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a selfie against the student's card and enroll it
    Enroll {
        #[arg(short, long)]
        student: String,
        /// Selfie image (jpeg or png)
        selfie: PathBuf,
    },
    /// List enrolled face samples of a student
    Samples {
        #[arg(short, long)]
        student: String,
    },
    /// Delete one face sample and its image
    Delete {
        #[arg(short, long)]
        student: String,
        id: u64,
    },
    /// Remove all face samples of a student
    Purge {
        #[arg(short, long)]
        student: String,
    },
    /// Find the enrolled student closest to a face
    Identify {
        /// Restrict the search to this class roster
        #[arg(long)]
        class: Option<String>,
        /// JSON file holding the embedding as an array of numbers
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        embedding: Option<PathBuf>,
        /// Image to embed with the identification pipeline first
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Open config file in editor
    Config {
        /// Write a config file with default values instead
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    if let Commands::Config { init } = cli.command {
        return open_config(config_path, init);
    }

    let cfg = config::load_config(config_path)?;
    let service = FaceService::open(cfg).context("Failed to initialize face service")?;

    match cli.command {
        Commands::Enroll { student, selfie } => {
            let upload = service.accept_upload(&selfie)?;
            let id = service.enroll(&student, upload)?;
            info!("✓ Face sample {} enrolled for student: {}", id, student);
            println!("{}", id);
        }
        Commands::Samples { student } => {
            let samples = service.list_samples(&student)?;
            info!("Found {} face sample(s) for {}", samples.len(), student);
            for sample in samples {
                println!("{}\t{}", sample.id, sample.image.display());
            }
        }
        Commands::Delete { student, id } => {
            service.delete_sample(&student, id)?;
            info!("✓ Face sample {} deleted for student: {}", id, student);
        }
        Commands::Purge { student } => {
            let count = service.purge_student(&student)?;
            info!("✓ {} face sample(s) purged for student: {}", count, student);
        }
        Commands::Identify {
            class,
            embedding,
            image,
        } => {
            let candidate = match (embedding, image) {
                (Some(path), _) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let vector: Vec<f32> = serde_json::from_str(&raw)
                        .with_context(|| format!("parsing embedding {}", path.display()))?;
                    match &class {
                        Some(class) => service.identify_in_class(class, &vector)?,
                        None => service.identify(&vector)?,
                    }
                }
                (None, Some(image)) => service.identify_image(&image, class.as_deref())?,
                (None, None) => anyhow::bail!("either --embedding or --image is required"),
            };

            match candidate {
                Some(candidate) => println!("{}", serde_json::to_string_pretty(&candidate)?),
                None => {
                    info!("No matching student");
                    println!("no match");
                }
            }
        }
        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn open_config(path: Option<&std::path::Path>, init: bool) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);

    if init {
        config::save_config(&config::Config::default(), Some(config_path))?;
        info!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
