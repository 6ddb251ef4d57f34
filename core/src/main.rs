use clap::Parser;
use dicomseg_core::cli::report::{
    BatchJson, BatchTextReport, PatientJson, StructureJson, StructureTextReport, WriteTextReport,
};
use dicomseg_core::cli::{Cli, Command, OutputFormat};
use dicomseg_core::{DicomSegError, LayoutCategory, Pipeline};
use log::{error, info};
use serde::Serialize;
use std::process;

fn main() {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    let config = match cli.pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };
    info!("Patients folder: {}", config.patients_folder.display());

    let pipeline = Pipeline::new(config);
    let success = match run_command(&pipeline, &cli.command, &cli.format) {
        Ok(success) => success,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            process::exit(if e.is_fatal() { 2 } else { 1 });
        }
    };
    if !success {
        process::exit(1);
    }
}

/// Runs one subcommand, returning whether everything succeeded
fn run_command(
    pipeline: &Pipeline,
    command: &Command,
    format: &OutputFormat,
) -> Result<bool, DicomSegError> {
    match command {
        Command::Classify => {
            let category = pipeline.classify();
            match format {
                OutputFormat::Text => println!("{}", category),
                OutputFormat::Json => print_json(&category)?,
            }
            Ok(category != LayoutCategory::Unrecognized)
        }
        Command::Structure => {
            let report = pipeline.structure()?;
            match format {
                OutputFormat::Text => print!("{}", StructureTextReport::new("Structure", &report)),
                OutputFormat::Json => print_json(&StructureJson::from(&report))?,
            }
            Ok(report.is_success())
        }
        Command::Write => {
            let patients = pipeline.write()?;
            match format {
                OutputFormat::Text => print!("{}", WriteTextReport::new(&patients)),
                OutputFormat::Json => {
                    let json: Vec<PatientJson> = patients.iter().map(PatientJson::from).collect();
                    print_json(&json)?
                }
            }
            Ok(patients.iter().all(|p| p.is_success()))
        }
        Command::Destructure => {
            let report = pipeline.destructure()?;
            match format {
                OutputFormat::Text => {
                    print!("{}", StructureTextReport::new("Destructure", &report))
                }
                OutputFormat::Json => print_json(&StructureJson::from(&report))?,
            }
            Ok(report.is_success())
        }
        Command::Run { destructure } => {
            let report = pipeline.run(*destructure)?;
            match format {
                OutputFormat::Text => print!("{}", BatchTextReport::new(&report)),
                OutputFormat::Json => print_json(&BatchJson::from(&report))?,
            }
            Ok(report.is_success())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), DicomSegError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
}
