mod config;
mod ddl;
mod etl;
mod export;
mod filters;
mod kpi;
mod model;
mod patient_sheet;
mod phase_sheet;
mod pipeline;
mod reconcile;
mod schema;
mod session;
mod store;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::ddl::{create_table_sql, TableKind};
use crate::filters::{age_bracket_options, received_bounds, run_filter_chain, status_options, PresetSelections};
use crate::kpi::Kpis;
use crate::model::{Choice, Field, Sheet, ALL_LABEL, NO_DATA_LABEL};
use crate::patient_sheet::PatientSheet;
use crate::phase_sheet::PhaseSheet;
use crate::session::Session;
use crate::store::Store;

#[derive(Parser)]
#[command(name = "tmz-tracker")]
#[command(about = "Loads patient tracking sheets into a store and reports on them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize both sheets and insert them into the store
    Load,

    /// Print the CREATE TABLE statements for the normalized sheets
    Schema,

    /// List the tables the store currently holds
    Check,

    /// Print the filter options offered for the current data
    Options,

    /// Filter the joined table and print indicators and rows
    Report {
        /// Status to keep, "Todos" for every status
        #[arg(long, default_value = ALL_LABEL)]
        status: String,

        /// Age bracket to keep; repeat for several
        #[arg(long = "age-bracket")]
        age_brackets: Vec<String>,

        /// First received date to keep (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last received date to keep (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Write the rows to this CSV file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn option_value(label: &str) -> Field<String> {
    if label == NO_DATA_LABEL {
        Field::NoData
    } else {
        Field::Value(label.to_string())
    }
}

fn selections(
    status: &str,
    age_brackets: &[String],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> PresetSelections {
    let status = if status == ALL_LABEL {
        Choice::All
    } else {
        Choice::Only(option_value(status))
    };
    let age_brackets = if age_brackets.is_empty() || age_brackets.iter().any(|b| b == ALL_LABEL) {
        Choice::All
    } else {
        Choice::Only(age_brackets.iter().map(|b| option_value(b)).collect::<BTreeSet<_>>())
    };

    PresetSelections {
        status,
        age_brackets,
        received: from.zip(to),
        notices: Vec::new(),
    }
}

fn load_config(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() {
        return Ok((Config::default(), false));
    }
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    Ok((config, true))
}

fn run_load(config: &Config) -> Result<()> {
    let mut store = Store::connect(&config.store).context("connecting to the store")?;
    let report = etl::load(&mut store, &config.etl);
    println!("{}", serde_json::to_string_pretty(&report)?);
    store.close().context("closing the store")?;
    Ok(())
}

fn print_ddl(config: &Config, sheet: &mut dyn Sheet, path: &Path, kind: &TableKind) -> Result<()> {
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    sheet.parse(&data).with_context(|| format!("parsing {}", path.display()))?;
    let columns = sheet.convert().columns;
    println!("{}", create_table_sql(&config.store.schema, &sheet.profile().table, &columns, kind));
    Ok(())
}

fn run_schema(config: &Config) -> Result<()> {
    let prefix = &config.etl.placeholder_prefix;
    let mut patients = PatientSheet::new(&config.store.patient_table, prefix);
    print_ddl(config, &mut patients, &config.etl.patient_file, &TableKind::Patients)?;

    let mut phases = PhaseSheet::new(&config.store.phase_table, prefix);
    let kind = TableKind::Phases {
        patient_table: config.store.patient_table.clone(),
    };
    print_ddl(config, &mut phases, &config.etl.phase_file, &kind)
}

fn run_check(config: &Config) -> Result<()> {
    let store = Store::connect(&config.store).context("connecting to the store")?;
    let tables = store.list_tables()?;
    tracing::info!(tables = tables.len(), "Store is reachable");
    for table in tables {
        println!("{}", table);
    }
    store.close()?;
    Ok(())
}

fn open_session(config: &Config) -> Session {
    let session = Session::open(config);
    if let Some(err) = session.last_error() {
        tracing::warn!("Continuing without data: {err}");
    }
    session
}

fn run_options(config: &Config) -> Result<()> {
    let mut session = open_session(config);
    let records = &session.snapshot().records;

    let statuses: Vec<String> = status_options(records).iter().map(|c| c.label()).collect();
    let brackets: Vec<String> = age_bracket_options(records).iter().map(|c| c.label()).collect();
    let bounds = received_bounds(records).map(|b| (b.min.to_string(), b.max.to_string()));
    let options = serde_json::json!({
        "ESTADO": statuses,
        "RANGO_DE_EDAD": brackets,
        "FECHA_DE_RECIBIDO": bounds,
    });
    println!("{}", serde_json::to_string_pretty(&options)?);

    session.close()?;
    Ok(())
}

fn run_report(config: &Config, mut preset: PresetSelections, output: Option<&Path>) -> Result<()> {
    let mut session = open_session(config);
    let outcome = run_filter_chain(&session.snapshot().records, &mut preset);
    for notice in &preset.notices {
        tracing::warn!("{notice:?}");
    }

    println!("{}", serde_json::to_string_pretty(&Kpis::for_outcome(&outcome))?);
    match output {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
            export::write_csv(&outcome.rows, file)?;
            tracing::info!(rows = outcome.rows.len(), path = %path.display(), "Exported rows");
        }
        None => export::write_csv(&outcome.rows, std::io::stdout().lock())?,
    }

    session.close()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.dashboard.log_filter)),
        )
        .init();
    if !found {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Load => run_load(&config),
        Commands::Schema => run_schema(&config),
        Commands::Check => run_check(&config),
        Commands::Options => run_options(&config),
        Commands::Report {
            status,
            age_brackets,
            from,
            to,
            output,
        } => run_report(&config, selections(&status, &age_brackets, from, to), output.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_to_choices() {
        let preset = selections("Todos", &[], None, None);
        assert_eq!(preset, PresetSelections::default());

        let brackets = vec!["18-30".to_string(), NO_DATA_LABEL.to_string()];
        let preset = selections(NO_DATA_LABEL, &brackets, None, None);
        assert_eq!(preset.status, Choice::Only(Field::NoData));
        match preset.age_brackets {
            Choice::Only(set) => {
                assert!(set.contains(&Field::NoData));
                assert!(set.contains(&Field::Value("18-30".to_string())));
            }
            Choice::All => panic!("expected a bracket set"),
        }
    }

    #[test]
    fn date_range_needs_both_ends() {
        assert!(Cli::try_parse_from(["tmz-tracker", "report", "--from", "2024-10-01"]).is_err());
        let cli = Cli::try_parse_from(["tmz-tracker", "report", "--from", "2024-10-01", "--to", "2024-10-31"]).unwrap();
        assert!(matches!(cli.command, Commands::Report { from: Some(_), to: Some(_), .. }));
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let (config, found) = load_config(Path::new("/nonexistent/tmz_tracker.toml")).unwrap();
        assert!(!found);
        assert_eq!(config.store.patient_table, "Pacientes_tmz");
    }
}
