use std::path::Path;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use rowgate::cli::print_result_chain;
use rowgate::{ConnSettings, Environment};

fn print_usage() {
    eprintln!(
        "Usage:\n  rowgate [settings.json | \"DSN=..;SERVER=..;DATABASE=..\"]\n\nWithout an argument settings come from ROWGATE_* environment variables.\n\nInteractive commands:\n  status        show the connection\n  help          show this help\n  quit | exit   leave\n  <SQL>         run a query and print its results"
    );
}

fn load_settings(arg: Option<&str>) -> Result<ConnSettings> {
    let mut settings = match arg {
        Some(a) if a.contains('=') => ConnSettings::from_connect_string(a),
        Some(path) => ConnSettings::from_json_file(Path::new(path))?,
        None => ConnSettings::default(),
    };
    settings.overlay_env_with(|k| std::env::var(k).ok());
    Ok(settings)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).init();

    let arg = std::env::args().nth(1);
    if matches!(arg.as_deref(), Some("-h") | Some("--help")) {
        print_usage();
        return Ok(());
    }
    let settings = load_settings(arg.as_deref())?;
    info!(target: "rowgate", "rowgate starting: {}", settings.log_summary());

    let env = Environment::new();
    let conn = env.alloc_connection()?;
    conn.connect(settings, None, None).context("connecting to the gateway")?;

    let mut rl = DefaultEditor::new()?;
    println!("rowgate interpreter. Type 'help' for commands.");
    loop {
        let line = match rl.readline("> ") {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() { continue; }
        let _ = rl.add_history_entry(line);
        match line.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "help" => { print_usage(); continue; }
            "status" => {
                println!("conn {} {:?}, protocol {:?}, server {}, cursors {}",
                    conn.id(), conn.status(), conn.generation(), conn.server_version(), conn.cursors());
                continue;
            }
            _ => {}
        }
        match conn.send_query(line) {
            Ok(res) => print_result_chain(&res),
            Err(e) => eprintln!("error [{}]: {}", e.sqlstate(), e),
        }
    }

    conn.disconnect()?;
    env.free_connection(&conn)?;
    Ok(())
}
