use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use web_replay::config;
use web_replay::diagnosis::{self, FailureDiagnosis};
use web_replay::orchestrator::ExecutionOrchestrator;
use web_replay::recording::RecordingSession;
use web_replay::runner::{ExecutionResult, ProjectRunSummary};
use web_replay::store::{FsProjectStore, ProjectStore};

/// Web Replay - record browser sessions, replay them as tests, diagnose failures
#[derive(Parser, Debug)]
#[command(
    name = "web-replay",
    about = "Record browser interactions as test cases, replay them and classify failures",
    after_help = "ENVIRONMENT VARIABLES:\n\
        WEB_REPLAY_PROJECTS_DIR     Root of the project tree\n\
        WEB_REPLAY_SESSION_DIR      Base directory for execution sessions\n\
        WEB_REPLAY_RUNNER           Interpreter for recorded scripts\n\
        WEB_REPLAY_RECORDER         Recorder command line\n\
        WEB_REPLAY_SCRIPT_EXT       Extension of recorded scripts\n\
        WEB_REPLAY_EXEC_TIMEOUT     Per test case time limit in seconds (0 = none)\n\
        WEB_REPLAY_RECORD_TIMEOUT   Recorder wait limit in seconds (0 = none)\n\
        RUST_LOG                    Log filter (overrides --verbose)"
)]
struct Args {
    /// Project tree root (overrides WEB_REPLAY_PROJECTS_DIR)
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Record a test case by interacting with a browser
    Record {
        /// Project the test case belongs to
        project: String,

        /// Test case identifier
        test_case: String,

        /// Page the recorder opens
        #[arg(short, long)]
        url: String,
    },

    /// Run a single test case
    Run {
        project: String,
        test_case: String,
    },

    /// Run every test case in a project
    RunProject { project: String },

    /// List recorded test cases of a project
    Cases { project: String },

    /// Show run history of a project
    Results {
        project: String,

        /// Only results of this test case
        #[arg(short, long)]
        test_case: Option<String>,
    },

    /// Classify an error message
    Classify {
        /// Error text (reads --file when omitted)
        text: Option<String>,

        /// File containing the error text
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Create a project
    Create {
        id: String,

        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List projects
    List,

    /// Show one project
    Show { id: String },

    /// Change a project's name or description
    Update {
        id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a project with all its test cases and results
    Delete { id: String },
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::get().clone();
    if let Some(dir) = args.projects_dir {
        config = config.projects_dir(dir);
    }
    let store = FsProjectStore::new(&config.projects_dir, config.script_ext.clone());
    let json = args.json;

    match args.command {
        Some(Commands::Project { action }) => project_command(&store, action, json)?,

        Some(Commands::Record {
            project,
            test_case,
            url,
        }) => {
            let mut recording = RecordingSession::new(Arc::new(store), Arc::new(web_replay::SystemProcessRunner))
                .recorder(config.recorder.clone())
                .wait_limit(config.recording_timeout);

            recording.start(&url, &project, &test_case)?;
            if !json {
                eprintln!("Recording {}/{}; close the browser to finish.", project, test_case);
            }
            let steps = recording.stop();

            if json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else {
                println!("Recorded {} steps:", steps.len());
                for (i, step) in steps.iter().enumerate() {
                    let detail = step
                        .url()
                        .or(step.selector())
                        .unwrap_or_default();
                    match step.value() {
                        Some(value) => println!("  {}. {} {} = {:?}", i + 1, step.kind(), detail, value),
                        None => println!("  {}. {} {}", i + 1, step.kind(), detail),
                    }
                }
            }
        }

        Some(Commands::Run { project, test_case }) => {
            let mut orchestrator = ExecutionOrchestrator::from_config(&config);
            let result = orchestrator.execute_test_case(&project, &test_case);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if !result.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Some(Commands::RunProject { project }) => {
            let mut orchestrator = ExecutionOrchestrator::from_config(&config);
            let summary = orchestrator.execute_project(&project)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if summary.failed_count > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }

        Some(Commands::Cases { project }) => {
            store.get_project(&project)?;
            let cases = store.list_test_cases(&project)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&cases)?);
            } else if cases.is_empty() {
                println!("No test cases in {}", project);
            } else {
                for case in &cases {
                    println!(
                        "{}  {} steps  {} bytes  recorded {}",
                        case.test_case_id,
                        case.step_count,
                        case.script_size,
                        case.recorded_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        Some(Commands::Results { project, test_case }) => {
            store.get_project(&project)?;
            let results = store.list_results(&project, test_case.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results recorded");
            } else {
                for result in &results {
                    println!(
                        "{}  {:<24} {:?}{}",
                        result.executed_at.format("%Y-%m-%d %H:%M:%S"),
                        result.test_case_id,
                        result.status,
                        result
                            .diagnosis
                            .as_ref()
                            .map(|d| format!(" ({})", d.category.label()))
                            .unwrap_or_default()
                    );
                }
            }
        }

        Some(Commands::Classify { text, file }) => {
            let error_text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)?,
                (None, None) => return Err("Provide error text or --file".into()),
            };
            let diagnosis = diagnosis::classify(&error_text);
            if json {
                println!("{}", serde_json::to_string_pretty(&diagnosis)?);
            } else {
                println!("{}", diagnosis.render());
            }
        }

        None => {
            println!("Web Replay - record, replay and diagnose browser test cases");
            println!();
            println!("Usage: web-replay <COMMAND>");
            println!();
            println!("Commands:");
            println!("  project      Create, list, show, update or delete projects");
            println!("  record       Record a test case in a browser");
            println!("  run          Run one test case");
            println!("  run-project  Run every test case in a project");
            println!("  cases        List recorded test cases");
            println!("  results      Show run history");
            println!("  classify     Classify an error message");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn project_command(store: &FsProjectStore, action: ProjectAction, json: bool) -> Result<(), Box<dyn Error>> {
    match action {
        ProjectAction::Create { id, name, description } => {
            let name = name.unwrap_or_else(|| id.clone());
            let info = store.create_project(&id, &name, &description)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Created project {} ({})", info.project_id, info.project_name);
            }
        }
        ProjectAction::List => {
            let projects = store.list_projects()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects under {}", store.root().display());
            } else {
                for project in &projects {
                    println!("{}  {}  {}", project.project_id, project.project_name, project.description);
                }
            }
        }
        ProjectAction::Show { id } => {
            let info = store.get_project(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Project:     {}", info.project_id);
                println!("Name:        {}", info.project_name);
                println!("Description: {}", info.description);
                println!("Created:     {}", info.created_at.to_rfc3339());
                println!("Updated:     {}", info.updated_at.to_rfc3339());
                println!("Test cases:  {}", store.list_test_cases(&id)?.len());
            }
        }
        ProjectAction::Update { id, name, description } => {
            let info = store.update_project(&id, name.as_deref(), description.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("Updated project {}", info.project_id);
            }
        }
        ProjectAction::Delete { id } => {
            store.delete_project(&id)?;
            if !json {
                println!("Deleted project {}", id);
            }
        }
    }
    Ok(())
}

fn print_result(result: &ExecutionResult) {
    match &result.diagnosis {
        None => println!("PASS {} ({} ms)", result.test_case_id, result.duration_ms),
        Some(diagnosis) => {
            println!("FAIL {} ({} ms)", result.test_case_id, result.duration_ms);
            print_diagnosis(diagnosis);
        }
    }
}

fn print_diagnosis(diagnosis: &FailureDiagnosis) {
    for line in diagnosis.render().lines() {
        println!("    {}", line);
    }
}

fn print_summary(summary: &ProjectRunSummary) {
    for result in &summary.results {
        print_result(result);
    }
    println!();
    println!(
        "{}: {} passed, {} failed, {} total",
        summary.project_id, summary.success_count, summary.failed_count, summary.total
    );
}
