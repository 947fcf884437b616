use std::fs;
use std::path::PathBuf;

use clap::Parser;
use hashcrf::{parse_instances, InstanceKind, SessionConfig, Trainer};

#[derive(Parser, Debug)]
struct Args {
    /// Path to the training corpus
    #[clap(long, value_parser)]
    train: PathBuf,

    /// Path to the development corpus
    #[clap(long, value_parser)]
    dev: Option<PathBuf>,

    /// Number of epochs
    #[clap(long, value_parser, default_value_t = 10)]
    epochs: u32,

    /// Arena size in bytes
    #[clap(long, value_parser, default_value_t = 1 << 24)]
    heap_size: usize,

    /// Capacity of the label table
    #[clap(long, value_parser, default_value_t = 16)]
    states: usize,

    /// Seed of the shuffling order
    #[clap(long, value_parser, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut session = SessionConfig::new()
        .heap_size(args.heap_size)?
        .number_of_states(args.states)?
        .build()?;

    for items in parse_instances(&fs::read_to_string(args.train)?)? {
        session.append_instance(&items, InstanceKind::Train)?;
    }
    eprintln!(
        "# of training sequences: {}",
        session.num_instances(InstanceKind::Train)
    );
    if let Some(dev) = args.dev {
        for items in parse_instances(&fs::read_to_string(dev)?)? {
            session.append_instance(&items, InstanceKind::Dev)?;
        }
        eprintln!(
            "# of dev sequences: {}",
            session.num_instances(InstanceKind::Dev)
        );
    }

    let reports = Trainer::new()
        .max_epochs(args.epochs)?
        .seed(args.seed)
        .train(&mut session)?;
    for report in reports {
        match report.accuracy {
            Some(accuracy) => println!(
                "epoch {}: train_loss={:.6} dev_loss={:.6} accuracy={:.4}",
                report.epoch, report.train_loss, report.dev_loss, accuracy
            ),
            None => println!(
                "epoch {}: train_loss={:.6}",
                report.epoch, report.train_loss
            ),
        }
    }

    println!("labels: {}", session.labels().join(" "));
    println!("nonzero weights: {}", session.l0());
    for usage in session.meminfo() {
        println!(
            "{:>16}: {:>10} / {:>10} bytes",
            usage.name, usage.used_bytes, usage.capacity_bytes
        );
    }
    Ok(())
}
