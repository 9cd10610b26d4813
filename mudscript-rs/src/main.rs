use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use mudscript::cli;
use mudscript::config::{Config, RuntimeConfig};
use mudscript::script::loader::FsTextSource;
use mudscript::script::manager::ScriptManager;
use mudscript::sink::StdoutSink;
use mudscript::var::{clock_variables, VariableStore};

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("mudscript: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(1);
        }
    };

    // ── Logging ───────────────────────────────────────────────────────────────
    let default_filter = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Settings and globals ──────────────────────────────────────────────────
    let config = RuntimeConfig {
        script_dir: cli::resolve_script_dir(args.script_dir.as_ref()),
        ..RuntimeConfig::default()
    };
    let globals = Arc::new(VariableStore::with_dynamic(clock_variables(
        &config.date_format,
        &config.time_format,
        &config.datetime_format,
    )));

    let vars = match &args.vars_file {
        Some(path) => match Config::load_file(path) {
            Ok((vars, errors)) => {
                for e in errors {
                    tracing::warn!(file = %path.display(), "{e}");
                }
                vars
            }
            Err(e) => {
                eprintln!("mudscript: {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::new(),
    };
    vars.apply(&globals);

    // ── Run ───────────────────────────────────────────────────────────────────
    tracing::debug!(dir = %config.script_dir.display(), script = %args.script, "starting");
    let source = FsTextSource::with_extension(&config.script_dir, &config.extension);
    let manager = ScriptManager::new(
        Arc::clone(&globals),
        Arc::new(source),
        Arc::new(StdoutSink),
        config,
    );
    let handle = match manager.load_and_run(&args.script, args.args) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("mudscript: {e}");
            std::process::exit(1);
        }
    };

    // ── Feed stdin until the script ends ──────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = handle.join() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    handle.deliver_stream_line(line.as_str());
                    let prompt = globals.get("prompt").unwrap_or_default();
                    if !prompt.is_empty() && line.trim_end().ends_with(prompt.as_str()) {
                        handle.deliver_prompt();
                    }
                }
                Ok(None) => {
                    handle.cancel();
                    handle.join().await;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "reading stdin");
                    handle.cancel();
                    handle.join().await;
                    break;
                }
            },
        }
    }
}
