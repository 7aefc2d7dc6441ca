use std::error::Error;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tpl::cli::{self, CliArgs, Command, ConfigFile};
use tpl::config::EngineConfig;
use tpl::console::{Console, ConsoleCommand, HELP};
use tpl::debug::{DebugError, DebugSession, ResumeAction};
use tpl::engine::{Engine, RenderStatus};
use tpl::frontmatter::Frontmatter;
use tpl::stdmodules::StdModules;

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("tpl: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    init_logging(&args);

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("tpl: {e}");
            std::process::exit(1);
        }
    }
}

/// `RUST_LOG` wins; otherwise `-q` / `-v` pick the level.
fn init_logging(args: &CliArgs) {
    let default = match (args.quiet, args.verbose) {
        (true, _) => "warn",
        (false, 0) => "tpl=info",
        (false, 1) => "tpl=debug",
        (false, _) => "tpl=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(spec: &ConfigFile) -> Result<EngineConfig, BoxError> {
    let path = match spec {
        ConfigFile::Skip => return Ok(EngineConfig::default()),
        ConfigFile::Explicit(p) => p.clone(),
        ConfigFile::Search => match cli::find_user_config() {
            Some(p) => p,
            None => return Ok(EngineConfig::default()),
        },
    };
    let (config, errors) = EngineConfig::load_file(&path)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    for e in &errors {
        warn!(file = %path.display(), "{e}");
    }
    info!(file = %path.display(), "loaded config");
    Ok(config)
}

/// Returns `Ok(false)` when the document rendered with errors.
async fn run(args: CliArgs) -> Result<bool, BoxError> {
    let mut config = load_config(&args.config)?;
    let doc = std::fs::read_to_string(&args.file)
        .map_err(|e| format!("{}: {e}", args.file.display()))?;

    let (frontmatter, body, offset) = Frontmatter::from_document(&doc)?;
    let header = &doc[..doc.len() - body.len()];
    config.line_offset += offset;

    let engine = Engine::new()
        .with_config(config)
        .with_modules(Arc::new(StdModules::new(&args.file).build()))
        .with_frontmatter(Arc::new(frontmatter));

    match args.command {
        Command::Render => render(&engine, header, body, args.json),
        Command::Plan => plan(&engine, body, args.json),
        Command::Ast => ast(&engine, body, args.json),
        Command::Debug => debug(engine, header, body.to_owned(), &args).await,
    }
}

fn render(engine: &Engine, header: &str, body: &str, json: bool) -> Result<bool, BoxError> {
    let render = engine.render(body)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&render)?);
    } else {
        print!("{header}{}", render.output);
        for e in &render.errors {
            eprintln!("tpl: line {}: {}", e.line, e.message);
        }
        if render.status == RenderStatus::Cancelled {
            eprintln!("tpl: cancelled");
        }
    }
    Ok(render.errors.is_empty() && render.status == RenderStatus::Completed)
}

fn plan(engine: &Engine, body: &str, json: bool) -> Result<bool, BoxError> {
    let plan = engine.plan(body)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(true);
    }
    for phase in &plan.phases {
        println!("phase {}:", phase.index);
        for block in &phase.blocks {
            let first = block.command.trim().lines().next().unwrap_or_default();
            println!("  [{}] {first}", block.id);
        }
    }
    println!(
        "{} of {} blocks parallelizable ({:.3})",
        plan.parallelizable_blocks, plan.total_blocks, plan.parallelization_ratio
    );
    Ok(true)
}

fn ast(engine: &Engine, body: &str, json: bool) -> Result<bool, BoxError> {
    let plan = engine.plan(body)?;
    let ast = engine.build_ast(body)?.with_plan(&plan);
    if json {
        println!("{}", serde_json::to_string_pretty(&ast.to_json())?);
        return Ok(true);
    }
    for s in &ast.all_statements {
        println!(
            "{:>4}  {}{:<6} {:?}  {}",
            s.display_line,
            "  ".repeat(s.depth),
            s.id,
            s.statement_type,
            s.code.lines().next().unwrap_or_default()
        );
    }
    println!();
    for e in &ast.control_flow_edges {
        let label = e.label.as_deref().map(|l| format!(" ({l})")).unwrap_or_default();
        println!("{} -> {}  {:?}{label}", e.from_node_id, e.to_node_id, e.edge_type);
    }
    Ok(true)
}

// ── Interactive debugger ──────────────────────────────────────────────────────

async fn debug(engine: Engine, header: &str, body: String, args: &CliArgs) -> Result<bool, BoxError> {
    let session = DebugSession::new(Arc::new(engine))
        .with_breakpoints(args.breakpoints.iter().copied())
        .break_on_start(args.step);
    let handle = session.handle();
    let task = session.spawn(body);

    let mut console = Console::new(io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last = ResumeAction::StepInto;

    'pauses: while let Ok(step) = handle.wait_for_pause().await {
        console.show_step(&step)?;
        loop {
            console.prompt()?;
            let Some(line) = lines.next_line().await? else {
                handle.stop();
                break 'pauses;
            };
            let cmd = match ConsoleCommand::parse(&line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    console.error(&e)?;
                    continue;
                }
            };
            let action = match cmd {
                ConsoleCommand::Resume(action) => action,
                ConsoleCommand::Repeat => last,
                ConsoleCommand::Break(line) => {
                    handle.add_breakpoint(line);
                    console.note(&format!("breakpoint at line {line}"))?;
                    continue;
                }
                ConsoleCommand::Clear(line) => {
                    if !handle.remove_breakpoint(line) {
                        console.error(&format!("no breakpoint at line {line}"))?;
                    }
                    continue;
                }
                ConsoleCommand::ListBreakpoints => {
                    let lines: Vec<_> = handle.breakpoints().iter().map(usize::to_string).collect();
                    console.note(&format!("breakpoints: {}", lines.join(", ")))?;
                    continue;
                }
                ConsoleCommand::Vars => {
                    if let Some(step) = handle.current_step() {
                        console.show_vars(&step)?;
                    }
                    continue;
                }
                ConsoleCommand::Print(name) => {
                    match handle.current_step().as_ref().and_then(|s| s.variable(&name)) {
                        Some(value) => console.show_var(&name, value)?,
                        None => console.error(&format!("{name} is not visible here"))?,
                    }
                    continue;
                }
                ConsoleCommand::Set(name, value) => {
                    if let Err(e) = handle.set_variable(&name, value) {
                        console.error(&e.to_string())?;
                    }
                    continue;
                }
                ConsoleCommand::Help => {
                    console.note(HELP)?;
                    continue;
                }
            };
            last = action;
            match handle.resume(action) {
                Ok(()) => break,
                Err(DebugError::Ended) => break 'pauses,
                Err(e) => console.error(&e.to_string())?,
            }
        }
    }

    let trace = task.await.map_err(|e| DebugError::Join(e.to_string()))??;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&trace.to_json())?);
    } else {
        print!("{header}{}", trace.output);
        if let Some(e) = &trace.error {
            console.error(e)?;
        }
        info!(steps = trace.steps.len(), pauses = trace.pauses.len(), "debug run finished");
    }
    Ok(trace.status == RenderStatus::Completed)
}
