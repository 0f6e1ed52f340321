//! The `tq` command-line surface (`SPEC_FULL.md` §A.5): one subcommand
//! per client operation in spec §4.F, plus `ls`/`dump`/`purge`/`start`/
//! `stop` and the `-- <cmd...>` enqueue shorthand.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tasque::error::TasqueError;
use tasque::store::Store;
use tasque::task::TaskState;
use tasque::{client, defs, logging};

#[derive(Parser)]
#[command(name = "tq", version, about = "Zero-configuration single-node workload manager")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Shorthand: `tq -- <cmd...>` enqueues everything after `--` with
    /// the caller's current working directory (spec §6).
    #[arg(last = true)]
    shorthand: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a command line.
    Enqueue {
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        pri: i64,
        #[arg(long)]
        rsc: Option<f64>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Remove a non-Running task (and its notes).
    Dequeue { id: i64 },
    /// Remove all Done rows and their notes.
    Clear,
    /// Send SIGTERM to a Running task.
    Kill { id: i64 },
    /// Attach a free-text note to a task.
    Annotate { id: i64, note: String },
    /// Remove a note by its noteid.
    Delannotation { noteid: i64 },
    /// List all notes.
    Dumpannotation,
    /// Change priority and/or resource weight of a Waiting task.
    Edit {
        id: i64,
        #[arg(long)]
        pri: Option<i64>,
        #[arg(long)]
        rsc: Option<f64>,
    },
    /// Report whether the supervisor is running.
    Isdaemonalive,
    /// Launch the supervisor as a daemon.
    Start,
    /// Stop the running supervisor.
    Stop,
    /// Pretty-print all tasks and a summary line.
    Ls,
    /// Dump the raw tables.
    Dump {
        /// Emit machine-readable JSON instead of the debug-formatted table dump.
        #[arg(long)]
        json: bool,
    },
    /// Remove the store and log files (refuses while the daemon is alive).
    Purge,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_cli();

    let result = dispatch(cli);
    match result {
        Ok(message) => {
            if let Some(message) = message {
                println!("{message}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tq: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Opens the default store and runs the reconcile pass (spec §4.D: "also
/// invoked once per client connection as a hygiene measure"), so any
/// worker killed out from under the supervisor since the last connection
/// shows up as Accident rather than a stale Running row.
fn open_store() -> Result<Store, TasqueError> {
    let store = Store::open_default()?;
    tasque::supervisor::reconcile(&store)?;
    Ok(store)
}

fn dispatch(cli: Cli) -> Result<Option<String>, TasqueError> {
    if !cli.shorthand.is_empty() {
        return enqueue_shorthand(cli.shorthand).map(Some);
    }

    let Some(command) = cli.command else {
        return Ok(Some(usage_banner()));
    };

    match command {
        Command::Enqueue { cwd, pri, rsc, cmd } => {
            if cmd.is_empty() {
                return Err(TasqueError::Usage("enqueue requires a command".into()));
            }
            let store = open_store()?;
            let cwd = cwd.unwrap_or(std::env::current_dir()?);
            let id = client::enqueue(&store, cwd, &cmd.join(" "), pri, rsc)?;
            Ok(Some(format!("enqueued task {id}")))
        }
        Command::Dequeue { id } => {
            let store = open_store()?;
            let removed = client::dequeue(&store, id)?;
            if removed {
                Ok(Some(format!("dequeued task {id}")))
            } else {
                Err(TasqueError::Usage(format!("task {id} is Running or does not exist")))
            }
        }
        Command::Clear => {
            let store = open_store()?;
            let removed = client::clear(&store)?;
            Ok(Some(format!("cleared {} task(s)", removed.len())))
        }
        Command::Kill { id } => {
            let store = open_store()?;
            let signalled = client::kill(&store, id)?;
            if signalled {
                Ok(Some(format!("sent SIGTERM to task {id}")))
            } else {
                Ok(Some(format!("task {id} is not Running")))
            }
        }
        Command::Annotate { id, note } => {
            let store = open_store()?;
            let noteid = client::annotate(&store, id, &note)?;
            Ok(Some(format!("note {noteid} added to task {id}")))
        }
        Command::Delannotation { noteid } => {
            let store = open_store()?;
            if client::delannotation(&store, noteid)? {
                Ok(Some(format!("removed note {noteid}")))
            } else {
                Err(TasqueError::Usage(format!("no such note: {noteid}")))
            }
        }
        Command::Dumpannotation => {
            let store = open_store()?;
            let notes = client::dumpannotation(&store)?;
            let mut out = String::new();
            for note in notes {
                out.push_str(&format!("{}\t{}\t{}\n", note.noteid, note.id, note.note));
            }
            Ok(Some(out.trim_end().to_string()))
        }
        Command::Edit { id, pri, rsc } => {
            let store = open_store()?;
            if client::edit(&store, id, pri, rsc)? {
                Ok(Some(format!("edited task {id}")))
            } else {
                Err(TasqueError::Usage(format!("task {id} is not Waiting")))
            }
        }
        Command::Isdaemonalive => match client::isdaemonalive()? {
            Some(pid) => Ok(Some(format!("alive (pid {pid})"))),
            None => Ok(Some("not running".to_string())),
        },
        Command::Start => {
            client::start()?;
            Ok(None)
        }
        Command::Stop => {
            if client::stop()? {
                Ok(Some("stopped".to_string()))
            } else {
                Err(TasqueError::Usage("supervisor is not running".into()))
            }
        }
        Command::Ls => {
            let store = open_store()?;
            Ok(Some(render_ls(&store)?))
        }
        Command::Dump { json } => {
            let store = open_store()?;
            if json {
                Ok(Some(render_dump_json(&store)?))
            } else {
                Ok(Some(render_dump(&store)?))
            }
        }
        Command::Purge => {
            client::purge(&defs::tasque_db())?;
            Ok(Some("purged".to_string()))
        }
    }
}

fn enqueue_shorthand(mut argv: Vec<String>) -> Result<String, TasqueError> {
    if !argv.is_empty() && argv[0] == "--" {
        argv.remove(0);
    }
    if argv.is_empty() {
        return Err(TasqueError::Usage("missing command after --".into()));
    }
    let store = open_store()?;
    let cwd = std::env::current_dir()?;
    let id = client::enqueue(&store, cwd, &argv.join(" "), 0, None)?;
    Ok(format!("enqueued task {id}"))
}

fn usage_banner() -> String {
    let status = match client::isdaemonalive() {
        Ok(Some(pid)) => format!("supervisor alive (pid {pid})"),
        Ok(None) => "supervisor not running".to_string(),
        Err(e) => format!("could not check supervisor status: {e}"),
    };
    format!("tq — zero-configuration single-node workload manager\n{status}\nrun `tq --help` for subcommands")
}

/// Status glyphs per spec §7: Done-OK, Done-fail, Running, Waiting,
/// Accident. Grounded on the commented `tqLs` pretty-printer in
/// `tasque/daemon.py`.
fn render_ls(store: &Store) -> Result<String, TasqueError> {
    let tasks = store.list_tasks()?;
    let mut out = String::new();
    let (mut waiting, mut running, mut done_ok, mut done_fail, mut accident) = (0, 0, 0, 0, 0);
    for task in &tasks {
        let glyph = match task.state() {
            TaskState::Waiting => {
                waiting += 1;
                "W"
            }
            TaskState::Running(_) => {
                running += 1;
                "R"
            }
            TaskState::Done(0) => {
                done_ok += 1;
                "+"
            }
            TaskState::Done(_) => {
                done_fail += 1;
                "x"
            }
            TaskState::Accident => {
                accident += 1;
                "!"
            }
        };
        let elapsed = match (task.stime, task.etime) {
            (Some(stime), Some(etime)) => tasque::util::sec2hms(etime - stime),
            (Some(stime), None) => tasque::util::sec2hms(tasque::util::now() - stime),
            (None, _) => tasque::util::sec2hms(0.0),
        };
        out.push_str(&format!(
            "[{glyph}] {:>4}  pri={:<3} rsc={:<5} elapsed={elapsed:<14} {}\n",
            task.id, task.pri, task.rsc, task.cmd
        ));
    }
    out.push_str(&format!(
        "-- waiting={waiting} running={running} done_ok={done_ok} done_fail={done_fail} accident={accident} resource={}",
        store.resource_name()?
    ));
    Ok(out)
}

fn render_dump(store: &Store) -> Result<String, TasqueError> {
    let mut out = String::new();
    out.push_str("== tq ==\n");
    for task in store.list_tasks()? {
        out.push_str(&format!("{:?}\n", task));
    }
    out.push_str("== notes ==\n");
    for note in store.list_notes()? {
        out.push_str(&format!("{:?}\n", note));
    }
    Ok(out.trim_end().to_string())
}

fn render_dump_json(store: &Store) -> Result<String, TasqueError> {
    #[derive(serde::Serialize)]
    struct Dump {
        tasks: Vec<tasque::task::Task>,
        notes: Vec<tasque::store::Note>,
    }
    let dump = Dump { tasks: store.list_tasks()?, notes: store.list_notes()? };
    serde_json::to_string_pretty(&dump)
        .map_err(|e| TasqueError::Worker(format!("failed to serialize dump: {e}")))
}
