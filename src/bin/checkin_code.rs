//! Check-in code utility
//!
//! Generate, decode and validate family check-in codes offline, e.g. to
//! verify a printed label at the pickup desk.
//!
//! Usage:
//!   checkin-code generate 7 3
//!   checkin-code decode 225-BBCJ
//!   checkin-code validate 225-BBCJ --instance 3

use clap::{Parser, Subcommand};
use kiosk_checkin::domain::code;
use kiosk_checkin::domain::{InstanceId, PersonId};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "checkin-code", version)]
#[command(about = "Generate and verify family check-in codes")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the code for a person and event instance
    Generate { person_id: PersonId, instance_id: InstanceId },
    /// Decode a code back to its person and instance (low 15 bits)
    Decode { code: String },
    /// Check a code, optionally against the expected instance and person
    Validate {
        code: String,
        #[arg(short, long)]
        instance: Option<InstanceId>,
        #[arg(short, long)]
        person: Option<PersonId>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    match args.command {
        Command::Generate { person_id, instance_id } => {
            let generated = code::generate_for(person_id, instance_id);
            if !code::is_representable(person_id.0, instance_id.0) {
                eprintln!(
                    "Warning: person {} / instance {} fall outside the decodable range; \
                     the code will not decode back to them",
                    person_id, instance_id
                );
            }
            println!("{}", generated);
            ExitCode::SUCCESS
        }
        Command::Decode { code: raw } => match code::decode(&raw) {
            Some(decoded) => {
                println!("person_id={} instance_id={}", decoded.person_id, decoded.instance_id);
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("Invalid code: {}", raw);
                ExitCode::FAILURE
            }
        },
        Command::Validate { code: raw, instance, person } => {
            match code::validate(&raw, instance, person) {
                Some(decoded) => {
                    println!(
                        "valid person_id={} instance_id={}",
                        decoded.person_id, decoded.instance_id
                    );
                    ExitCode::SUCCESS
                }
                None => {
                    println!("invalid");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
