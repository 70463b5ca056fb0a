use clap::Parser;
use eyre::{Context, Result};

use eventdb::{Database, Entry, JsonDataSource, Query, SortMode, StatisticsTable};

#[derive(Parser)]
#[command(name = "wtfdump")]
#[command(about = "inspect wtf-json trace recordings")]
#[command(version)]
struct Args {
    #[arg(help = "trace file path (.wtf-json)")]
    trace: String,

    #[arg(
        short,
        long,
        help = "filter expression: substring, /regex/, or path/selector"
    )]
    query: Option<String>,

    #[arg(long, help = "print per-event-type statistics instead of events")]
    stats: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut db = Database::new();
    let zone = db.create_zone("main", "script", args.trace.clone());
    let source = JsonDataSource::from_path(&args.trace)
        .with_context(|| format!("failed to load trace path={}", args.trace))?;
    let events = source.load_into(&mut db, zone)?;
    tracing::info!(events, "trace loaded");

    if args.stats {
        let end_ms = db
            .zone(zone)
            .map(|zone| zone.store().last_time_ms())
            .unwrap_or_default();
        let filter = args.query.as_deref().map(Query::compile).transpose()?;
        let mut table = StatisticsTable::new();
        table.rebuild(&db, 0.0, end_ms, filter.as_ref());

        println!("{:<40} {:>10} {:>12} {:>12}", "event", "count", "total ms", "mean ms");
        table.for_each(SortMode::TotalTime, |entry| match entry {
            Entry::Scope(scope) => println!(
                "{:<40} {:>10} {:>12.3} {:>12.3}",
                scope.name(),
                scope.count(),
                scope.total_time_ms(),
                scope.mean_time_ms()
            ),
            Entry::Instance(instance) => println!(
                "{:<40} {:>10} {:>12} {:>12}",
                instance.name(),
                instance.count(),
                "-",
                "-"
            ),
        });
    } else {
        // "//" compiles to an empty regex, matching every event.
        let expression = args.query.as_deref().unwrap_or("//");
        let result = db.query(expression)?;
        tracing::debug!(
            expression = %result.expression(),
            matches = result.total_matches(),
            elapsed_us = result.elapsed().as_micros() as u64,
            "query finished"
        );
        let stdout = std::io::stdout();
        result.dump_csv(&db, &mut stdout.lock())?;
    }

    Ok(())
}
