// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;

use mstep::audio;
use mstep::config::{Config, InstrumentConfig, PatternConfig};
use mstep::samples::SampleStore;
use mstep::Engine;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A step sequencer and drum sampler."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Loads and verifies the kit in an engine configuration.
    Kit {
        /// The path to the engine configuration.
        config_path: String,
    },
    /// Parses a pattern file and prints its step grid.
    Pattern {
        /// The path to the pattern file.
        pattern_path: String,
    },
    /// Plays a pattern through the configured audio device.
    Play {
        /// The path to the engine configuration.
        config_path: String,
        /// The path to the pattern file.
        pattern_path: String,
        /// How long to play before stopping.
        #[arg(short, long, default_value = "8s")]
        duration: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Kit { config_path } => {
            let config = Config::load(&PathBuf::from(&config_path))?;

            if config.kit().is_empty() {
                println!("No instruments found in {}.", config_path.as_str());
                return Ok(());
            }

            // Decode the kit without opening an audio device.
            let store = SampleStore::new(config.audio().sample_rate());
            let mut instruments: Vec<(&String, &InstrumentConfig)> =
                config.kit().iter().collect();
            instruments.sort_by(|a, b| a.0.cmp(b.0));

            let mut failures = 0;
            println!("Instruments (count: {}):", instruments.len());
            for (id, instrument) in instruments {
                match store.load(id, instrument.file()) {
                    Ok(sample) => println!(
                        "- {} ({}, channels: {}, duration: {:.2}s, memory: {} KB)",
                        id,
                        instrument.file().display(),
                        sample.channels(),
                        sample.duration().as_secs_f64(),
                        sample.memory_size() / 1024
                    ),
                    Err(e) => {
                        failures += 1;
                        println!("- {}: {}", id, e);
                    }
                }
            }
            println!("\nTotal memory: {} KB", store.memory_usage() / 1024);

            if failures > 0 {
                return Err(format!("{} kit sample(s) failed to load", failures).into());
            }
        }
        Commands::Pattern { pattern_path } => {
            let pattern = PatternConfig::load(&PathBuf::from(pattern_path))?.to_pattern()?;

            println!("{}", pattern);
        }
        Commands::Play {
            config_path,
            pattern_path,
            duration,
        } => {
            let duration: Duration = DurationString::from_string(duration)?.into();
            let config = Config::load(&PathBuf::from(config_path))?;
            let pattern = PatternConfig::load(&PathBuf::from(pattern_path))?.to_pattern()?;

            let engine = Engine::new(&config)?;
            engine.start_playback(pattern);
            thread::sleep(duration);
            engine.stop_playback();
        }
    }

    Ok(())
}
