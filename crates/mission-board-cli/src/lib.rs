//! Command surface for the mission board.
//!
//! Hosts embed it through [`run_cli`] for a parsed command line, or through
//! [`run_command`] against an already constructed [`MissionService`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mission_board_core::{
    compare_missions, format_date, parse_date, parse_year_month, AggregateSnapshot, DailyRecord,
    DayScore, LimitDecision, MissionCatalog, MissionComparison, MissionError, MissionService,
    Modifier, MutationOutcome, RecordStore, StoreError, UnconfiguredStore,
};
use mission_board_store_sqlite::SqliteRecordStore;
use serde::Serialize;

mod logging;

pub use logging::init_logging;

pub const DB_ENV: &str = "MISSION_BOARD_DB";
pub const CATALOG_ENV: &str = "MISSION_BOARD_CATALOG";

const UNCONFIGURED_REMEDIATION: &str =
    "no database configured; pass --db <path> or set MISSION_BOARD_DB to enable writes";

#[derive(Debug, Parser)]
#[command(name = "mb")]
#[command(about = "Mission board scoring CLI")]
pub struct Cli {
    /// `SQLite` database holding daily records. Without it every read is
    /// empty and every write fails.
    #[arg(long, env = DB_ENV, global = true)]
    db: Option<PathBuf>,

    /// JSON mission catalog; defaults to the built-in catalog.
    #[arg(long, env = CATALOG_ENV, global = true)]
    catalog: Option<PathBuf>,

    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Emit machine-readable JSON, including error envelopes.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn json(&self) -> bool {
        self.json
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Missions {
        #[command(subcommand)]
        command: MissionsCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    Score {
        #[command(subcommand)]
        command: ScoreCommand,
    },
    Limit {
        #[command(subcommand)]
        command: LimitCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum MissionsCommand {
    List,
}

#[derive(Debug, Subcommand)]
pub enum RecordCommand {
    Show(DayArgs),
    Count(RecordCountArgs),
    Members(RecordMembersArgs),
    Clear(DayArgs),
}

#[derive(Debug, Args)]
pub struct DayArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    department: String,
}

#[derive(Debug, Args)]
pub struct RecordCountArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    department: String,
    #[arg(long)]
    mission: String,
    #[arg(long, allow_negative_numbers = true)]
    count: i64,
}

#[derive(Debug, Args)]
pub struct RecordMembersArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    department: String,
    #[arg(long)]
    mission: String,
    /// Repeat for each member; omit to clear the list.
    #[arg(long = "member")]
    members: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum ScoreCommand {
    Day(DayArgs),
    Month(ScoreMonthArgs),
    All(ScoreAllArgs),
}

#[derive(Debug, Args)]
pub struct ScoreMonthArgs {
    /// Month as `yyyy-MM`.
    #[arg(long)]
    month: String,
    /// Include the per-mission comparison table.
    #[arg(long)]
    details: bool,
}

#[derive(Debug, Args)]
pub struct ScoreAllArgs {
    #[arg(long)]
    details: bool,
}

#[derive(Debug, Subcommand)]
pub enum LimitCommand {
    Check(LimitCheckArgs),
}

#[derive(Debug, Args)]
pub struct LimitCheckArgs {
    #[arg(long)]
    date: String,
    #[arg(long)]
    department: String,
    #[arg(long)]
    mission: String,
    /// Day value to test: a count, or a member count for member-list missions.
    #[arg(long)]
    proposed: u32,
}

/// JSON error body printed for failed commands in `--json` mode.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        let code = if let Some(mission) = err.downcast_ref::<MissionError>() {
            mission.code()
        } else if let Some(store) = err.downcast_ref::<StoreError>() {
            store.code()
        } else {
            "cli.error"
        };
        Self {
            code: code.to_string(),
            message: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Serialize)]
struct Contract<'a, T: Serialize> {
    contract_version: &'static str,
    #[serde(flatten)]
    data: &'a T,
}

#[derive(Debug, Serialize)]
struct RecordView {
    key: String,
    record: Option<DailyRecord>,
}

#[derive(Debug, Serialize)]
struct MutationView {
    key: String,
    #[serde(flatten)]
    outcome: MutationOutcome,
}

#[derive(Debug, Serialize)]
struct ScoreReport {
    snapshot: AggregateSnapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    missions: Vec<MissionComparison>,
}

#[derive(Debug, Serialize)]
struct LimitView {
    date: String,
    department: String,
    mission_id: String,
    proposed: u32,
    #[serde(flatten)]
    decision: LimitDecision,
}

/// Executes the parsed top-level command line.
///
/// # Errors
/// Returns an error when the catalog or database cannot be loaded, or the
/// command itself fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    init_logging(&cli.log_level);

    let catalog = Arc::new(load_catalog(cli.catalog.as_deref())?);

    match cli.db.as_deref() {
        Some(path) => {
            let store = SqliteRecordStore::open(path)?;
            store.migrate()?;
            tracing::debug!(db = %path.display(), "using sqlite record store");
            run_command(
                cli.command,
                &MissionService::new(Arc::new(store), catalog),
                cli.json,
            )
        }
        None => {
            tracing::warn!("no database configured; running read-only with empty data");
            let store = UnconfiguredStore::new(UNCONFIGURED_REMEDIATION);
            run_command(
                cli.command,
                &MissionService::new(Arc::new(store), catalog),
                cli.json,
            )
        }
    }
}

/// Loads the catalog document at `path`, or the built-in catalog.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a valid catalog.
pub fn load_catalog(path: Option<&Path>) -> Result<MissionCatalog> {
    let Some(path) = path else {
        return Ok(MissionCatalog::standard());
    };

    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog at {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&body)
        .with_context(|| format!("invalid catalog JSON at {}", path.display()))?;
    let catalog = MissionCatalog::from_json(&value)
        .with_context(|| format!("invalid catalog at {}", path.display()))?;

    tracing::debug!(
        path = %path.display(),
        missions = catalog.missions().len(),
        "catalog loaded"
    );
    Ok(catalog)
}

/// Executes a parsed command against an existing service.
///
/// # Errors
/// Returns an error when argument parsing, validation or store access fails.
pub fn run_command<S: RecordStore>(
    command: Command,
    service: &MissionService<S>,
    json: bool,
) -> Result<()> {
    match command {
        Command::Missions { command } => run_missions(&command, service.catalog(), json),
        Command::Record { command } => run_record(&command, service, json),
        Command::Score { command } => run_score(&command, service, json),
        Command::Limit { command } => run_limit(&command, service, json),
    }
}

fn run_missions(command: &MissionsCommand, catalog: &MissionCatalog, json: bool) -> Result<()> {
    match command {
        MissionsCommand::List => {
            if json {
                print_contract("mission_catalog.v1", catalog)?;
            } else {
                print_catalog(catalog);
            }
            Ok(())
        }
    }
}

fn run_record<S: RecordStore>(
    command: &RecordCommand,
    service: &MissionService<S>,
    json: bool,
) -> Result<()> {
    match command {
        RecordCommand::Show(args) => {
            let date = parse_date(&args.date)?;
            let view = RecordView {
                key: mission_board_core::record_key(date, &args.department),
                record: service.record(date, &args.department)?,
            };
            if json {
                print_contract("daily_record.v1", &view)?;
            } else {
                print_record(&view);
            }
            Ok(())
        }
        RecordCommand::Count(args) => {
            let date = parse_date(&args.date)?;
            let outcome = service.set_count(date, &args.department, &args.mission, args.count)?;
            report_mutation(date, &args.department, outcome, json)
        }
        RecordCommand::Members(args) => {
            let date = parse_date(&args.date)?;
            let outcome =
                service.set_members(date, &args.department, &args.mission, &args.members)?;
            report_mutation(date, &args.department, outcome, json)
        }
        RecordCommand::Clear(args) => {
            let date = parse_date(&args.date)?;
            let outcome = service.clear_day(date, &args.department)?;
            report_mutation(date, &args.department, outcome, json)
        }
    }
}

fn run_score<S: RecordStore>(
    command: &ScoreCommand,
    service: &MissionService<S>,
    json: bool,
) -> Result<()> {
    match command {
        ScoreCommand::Day(args) => {
            let date = parse_date(&args.date)?;
            let score = service.day_score(date, &args.department)?;
            if json {
                print_contract("day_score.v1", &score)?;
            } else {
                print_day_score(&score, service.catalog());
            }
            Ok(())
        }
        ScoreCommand::Month(args) => {
            let (year, month) = parse_year_month(&args.month)?;
            let snapshot = service.month_scores(year, month)?;
            report_scores(snapshot, service.catalog(), args.details, json)
        }
        ScoreCommand::All(args) => {
            let snapshot = service.all_time_scores()?;
            report_scores(snapshot, service.catalog(), args.details, json)
        }
    }
}

fn run_limit<S: RecordStore>(
    command: &LimitCommand,
    service: &MissionService<S>,
    json: bool,
) -> Result<()> {
    match command {
        LimitCommand::Check(args) => {
            let date = parse_date(&args.date)?;
            let decision =
                service.check_limit(date, &args.department, &args.mission, args.proposed)?;
            let view = LimitView {
                date: format_date(date),
                department: args.department.clone(),
                mission_id: args.mission.clone(),
                proposed: args.proposed,
                decision,
            };
            if json {
                print_contract("limit_check.v1", &view)?;
            } else {
                match decision {
                    LimitDecision::Accept => println!("accept"),
                    LimitDecision::Reject {
                        current_total,
                        limit,
                    } => println!("reject: {current_total} already counted this month, limit {limit}"),
                }
            }
            Ok(())
        }
    }
}

fn report_mutation(
    date: time::Date,
    department: &str,
    outcome: MutationOutcome,
    json: bool,
) -> Result<()> {
    let view = MutationView {
        key: mission_board_core::record_key(date, department),
        outcome,
    };
    if json {
        return print_contract("mutation.v1", &view);
    }
    match &view.outcome {
        MutationOutcome::Stored(record) => {
            println!("stored {}", view.key);
            print_record_entries(record);
        }
        MutationOutcome::Deleted => println!("deleted {}", view.key),
        MutationOutcome::Unchanged => println!("unchanged {}", view.key),
    }
    Ok(())
}

fn report_scores(
    snapshot: AggregateSnapshot,
    catalog: &MissionCatalog,
    details: bool,
    json: bool,
) -> Result<()> {
    let missions = if details {
        compare_missions(&snapshot, catalog)
    } else {
        Vec::new()
    };

    if json {
        return print_contract("score_report.v1", &ScoreReport { snapshot, missions });
    }

    print_snapshot(&snapshot, catalog);
    if details {
        print_comparisons(&missions, catalog);
    }
    Ok(())
}

fn print_contract<T: Serialize>(contract_version: &'static str, data: &T) -> Result<()> {
    let payload = Contract {
        contract_version,
        data,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn department_label(catalog: &MissionCatalog, id: &str) -> String {
    match catalog.department(id) {
        Some(department) => format!("{} ({id})", department.name),
        None => id.to_string(),
    }
}

fn print_catalog(catalog: &MissionCatalog) {
    println!("{:<20} {:>6}  {:<6} rules", "id", "points", "unit");
    for mission in catalog.missions() {
        let rules = mission
            .modifiers
            .iter()
            .map(describe_modifier)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<20} {:>6}  {:<6} {}",
            mission.id, mission.points, mission.unit, rules
        );
    }
    let departments = catalog
        .departments()
        .iter()
        .map(|department| department_label(catalog, &department.id))
        .collect::<Vec<_>>()
        .join(", ");
    println!("departments: {departments}");
}

fn describe_modifier(modifier: &Modifier) -> String {
    match modifier {
        Modifier::EligibilityWindow { date } => format!("only on {}", format_date(*date)),
        Modifier::MemberList => "member list".to_string(),
        Modifier::Threshold { min_members } => format!("needs {min_members}+ members"),
        Modifier::MonthlyCap { limit, unit } => format!("max {limit}/month ({unit:?})"),
    }
}

fn print_record(view: &RecordView) {
    match &view.record {
        Some(record) => {
            println!("{} (updated {})", view.key, record.updated_at);
            print_record_entries(record);
        }
        None => println!("{}: no record", view.key),
    }
}

fn print_record_entries(record: &DailyRecord) {
    for (mission_id, count) in &record.missions {
        println!("  {mission_id}: {count}");
    }
    for (mission_id, members) in &record.meditation_members {
        let names = members.iter().cloned().collect::<Vec<_>>().join(", ");
        println!("  {mission_id}: {} [{names}]", members.len());
    }
}

fn print_day_score(score: &DayScore, catalog: &MissionCatalog) {
    println!(
        "{} {}: {} points",
        format_date(score.date),
        department_label(catalog, &score.department),
        score.total
    );
    for entry in &score.breakdown {
        let name = catalog
            .mission(&entry.mission_id)
            .map_or(entry.mission_id.as_str(), |mission| mission.name.as_str());
        println!("  {name}: {} x{}", entry.points, entry.count);
    }
}

fn print_snapshot(snapshot: &AggregateSnapshot, catalog: &MissionCatalog) {
    println!("range: {} ({} records)", snapshot.range, snapshot.record_count);
    for (department, total) in &snapshot.department_totals {
        println!("  {}: {total}", department_label(catalog, department));
    }
    println!("standing: {}", snapshot.standing);
}

fn print_comparisons(rows: &[MissionComparison], catalog: &MissionCatalog) {
    let (first, second) = catalog.contestants();
    println!(
        "{:<20} {:>8} {:>8} {:>6}",
        "mission", first.id, second.id, "diff"
    );
    for row in rows {
        println!(
            "{:<20} {:>8} {:>8} {:>6}",
            row.mission_id,
            row.first,
            row.second,
            row.formatted_difference()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn execute_cli(args: &[&str]) -> Result<()> {
        let cli = Cli::try_parse_from(args)?;
        run_cli(cli)
    }

    #[test]
    fn error_envelope_uses_domain_codes() {
        let rejection = anyhow::Error::new(MissionError::MonthlyLimitExceeded {
            mission_id: "department-visit".to_string(),
            current_total: 2,
            limit: 2,
        });
        assert_eq!(
            ErrorEnvelope::from_error(&rejection).code,
            "mission.monthly_limit"
        );

        let store = anyhow::Error::new(MissionError::from(StoreError::Configuration(
            UNCONFIGURED_REMEDIATION.to_string(),
        )));
        let envelope = ErrorEnvelope::from_error(&store);
        assert_eq!(envelope.code, "store.configuration");
        assert!(envelope.message.contains("--db"));
        assert!(envelope.message.contains(DB_ENV));

        let other = anyhow::anyhow!("boom").context("while testing");
        assert_eq!(ErrorEnvelope::from_error(&other).code, "cli.error");
    }

    #[test]
    fn negative_counts_parse_and_reach_validation() {
        let cli = must(
            Cli::try_parse_from([
                "mb", "record", "count", "--date", "2026-02-07", "--department", "sarang",
                "--mission", "testimony", "--count", "-1",
            ])
            .map_err(Into::into),
        );
        let service = MissionService::new(
            Arc::new(UnconfiguredStore::default()),
            Arc::new(MissionCatalog::standard()),
        );
        let err = match run_command(cli.command, &service, true) {
            Err(err) => err,
            Ok(()) => panic!("negative count should be rejected"),
        };
        assert_eq!(ErrorEnvelope::from_error(&err).code, "mission.validation");
    }

    #[test]
    fn contract_wrapper_flattens_payload() {
        let view = MutationView {
            key: "2026-02-07_sarang".to_string(),
            outcome: MutationOutcome::Deleted,
        };
        let payload = Contract {
            contract_version: "mutation.v1",
            data: &view,
        };
        let value = must(serde_json::to_value(&payload).map_err(Into::into));
        assert_eq!(
            value,
            json!({
                "contract_version": "mutation.v1",
                "key": "2026-02-07_sarang",
                "outcome": "deleted"
            })
        );
    }

    #[test]
    fn catalog_file_overrides_builtin() {
        let path = std::env::temp_dir().join(format!(
            "mission-board-catalog-{}.json",
            Ulid::new()
        ));
        let document = must(serde_json::to_string(&MissionCatalog::standard()).map_err(Into::into));
        must(std::fs::write(&path, document).map_err(Into::into));

        let catalog = must(load_catalog(Some(&path)));
        assert_eq!(catalog, MissionCatalog::standard());

        must(std::fs::write(&path, "{\"missions\": []}").map_err(Into::into));
        assert!(load_catalog(Some(&path)).is_err());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn cli_end_to_end_against_sqlite() {
        let db_path = std::env::temp_dir().join(format!(
            "mission-board-cli-e2e-{}.sqlite3",
            Ulid::new()
        ));
        let db = db_path.to_string_lossy().to_string();

        must(execute_cli(&[
            "mb", "--db", &db, "record", "count", "--date", "2026-02-07", "--department",
            "sarang", "--mission", "testimony", "--count", "3",
        ]));
        must(execute_cli(&[
            "mb", "--db", &db, "record", "members", "--date", "2026-02-07", "--department",
            "hana", "--mission", "evangelism", "--member", "kim",
        ]));
        must(execute_cli(&["mb", "--db", &db, "score", "month", "--month", "2026-02", "--details"]));

        let store = must(SqliteRecordStore::open(&db_path));
        assert_eq!(must(store.record_count().map_err(Into::into)), 2);

        must(execute_cli(&[
            "mb", "--db", &db, "record", "clear", "--date", "2026-02-07", "--department", "sarang",
        ]));
        assert_eq!(must(store.record_count().map_err(Into::into)), 1);

        let _ = std::fs::remove_file(&db_path);
    }
}
