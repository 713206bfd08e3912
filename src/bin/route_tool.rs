use anyhow::{Context, Result, anyhow, bail};
use bindroute::{Router, RoutingConfig, RoutingContext, SqlDialect, StatementClassifier};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "route-tool")]
#[command(about = "Inspect and dry-run statement routing configurations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a routing config and print its bind groups
    Check {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the classification of each statement
    Classify {
        #[arg(long, default_value = "postgres")]
        dialect: String,
        #[arg(required = true)]
        sql: Vec<String>,
    },
    /// Route a script of statements through one context
    ///
    /// One statement per line. `RESET` resets the context, `BIND <group>`
    /// and `UNBIND` open and close an override, `#` starts a comment.
    Replay {
        #[arg(long)]
        config: PathBuf,
        /// Script file (stdin when omitted)
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { config } => check(&config),
        Command::Classify { dialect, sql } => classify(&dialect, &sql),
        Command::Replay { config, script } => {
            let router = load_router(&config)?;
            let text = read_script(script.as_deref())?;
            for line in replay(&router, &text)? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn load_router(path: &Path) -> Result<Router> {
    let config = RoutingConfig::from_json_file(path)
        .with_context(|| format!("Failed to load routing config '{}'", path.display()))?;
    Router::new(config).with_context(|| format!("Invalid routing config '{}'", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let router = load_router(path)?;
    let config = router.config();

    println!(
        "OK: default group '{}', read group '{}', strategy {:?}, sticky_after_write={}, enabled={}",
        config.default_group, config.read_group, config.strategy, config.sticky_after_write, config.enabled
    );
    for group in router.pool().groups() {
        println!("[{}]", group.name());
        for engine in group.engines() {
            println!("  {:<16} weight={:<3} {}", engine.name(), engine.weight(), engine.url());
        }
    }
    Ok(())
}

fn parse_dialect(name: &str) -> Result<SqlDialect> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
        "mysql" => Ok(SqlDialect::MySql),
        "sqlite" => Ok(SqlDialect::Sqlite),
        "generic" => Ok(SqlDialect::Generic),
        other => Err(anyhow!("Unknown dialect '{}'. Expected postgres, mysql, sqlite or generic", other)),
    }
}

fn classify(dialect: &str, statements: &[String]) -> Result<()> {
    let classifier = StatementClassifier::new(parse_dialect(dialect)?, 0);
    for sql in statements {
        println!("{:<16} {}", classifier.classify(sql).to_string(), sql);
    }
    Ok(())
}

fn read_script(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read script '{}'", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read script from stdin")?;
            Ok(text)
        }
    }
}

enum Directive<'a> {
    Reset,
    Bind(&'a str),
    Unbind,
    Sql(&'a str),
}

impl<'a> Directive<'a> {
    fn parse(line: &'a str) -> Self {
        let upper = line.to_ascii_uppercase();
        if upper == "RESET" {
            Directive::Reset
        } else if upper == "UNBIND" {
            Directive::Unbind
        } else if upper.split_whitespace().next() == Some("BIND") {
            Directive::Bind(line[4..].trim())
        } else {
            Directive::Sql(line)
        }
    }
}

fn replay(router: &Router, script: &str) -> Result<Vec<String>> {
    let mut ctx = RoutingContext::new();
    let mut lines = script.lines().enumerate().map(|(i, line)| (i + 1, line));
    let mut out = Vec::new();

    replay_block(router, &mut ctx, &mut lines, 0, &mut out)?;
    Ok(out)
}

fn replay_block<'s, I>(
    router: &Router,
    ctx: &mut RoutingContext,
    lines: &mut I,
    depth: usize,
    out: &mut Vec<String>,
) -> Result<()>
where
    I: Iterator<Item = (usize, &'s str)>,
{
    while let Some((lineno, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match Directive::parse(line) {
            Directive::Reset => {
                router.reset_context(ctx);
                out.push(format!("{:>4}  -- reset", lineno));
            }
            Directive::Bind(group) => {
                if group.is_empty() {
                    bail!("line {}: BIND requires a group name", lineno);
                }
                let mut scoped = router
                    .with_bind_group(&mut *ctx, group)
                    .with_context(|| format!("line {}: cannot bind", lineno))?;
                out.push(format!("{:>4}  -- bind {}", lineno, group));
                replay_block(router, &mut scoped, lines, depth + 1, out)?;
            }
            Directive::Unbind => {
                if depth == 0 {
                    bail!("line {}: UNBIND without a matching BIND", lineno);
                }
                out.push(format!("{:>4}  -- unbind", lineno));
                return Ok(());
            }
            Directive::Sql(sql) => {
                let decision = router
                    .route(sql, ctx)
                    .with_context(|| format!("line {}: routing failed", lineno))?;
                let classification = decision
                    .classification
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                out.push(format!(
                    "{:>4}  {:<16} {:<8} {:<16} {}",
                    lineno,
                    decision.engine.name(),
                    decision.reason.to_string(),
                    classification,
                    sql
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindroute::EngineDescriptor;

    fn router() -> Router {
        Router::new(
            RoutingConfig::new("postgres://p/app")
                .replica_descriptor(EngineDescriptor::new("postgres://r1/app").name("R1"))
                .replica_descriptor(EngineDescriptor::new("postgres://r2/app").name("R2"))
                .engine("analytics", EngineDescriptor::new("postgres://olap/app").name("OLAP")),
        )
        .unwrap()
    }

    fn engines(lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .filter(|l| !l.contains("--"))
            .map(|l| l.split_whitespace().nth(1).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_replay_script() {
        let script = "SELECT 1\nSELECT 2\n# comment\nUPDATE t SET a = 1\nSELECT 3\nRESET\nSELECT 4\n";
        let out = replay(&router(), script).unwrap();
        assert_eq!(engines(&out), vec!["R1", "R2", "primary", "primary", "R1"]);
    }

    #[test]
    fn test_replay_bind_blocks() {
        let script = "BIND analytics\nSELECT 1\nBIND default\nSELECT 2\nUNBIND\nSELECT 3\nUNBIND\nSELECT 4";
        let out = replay(&router(), script).unwrap();
        assert_eq!(engines(&out), vec!["OLAP", "primary", "OLAP", "R1"]);
    }

    #[test]
    fn test_replay_errors() {
        assert!(replay(&router(), "UNBIND").is_err());
        assert!(replay(&router(), "BIND nowhere\nSELECT 1").is_err());
        let err = replay(&router(), "BIND\nSELECT 1").unwrap_err();
        assert!(err.to_string().contains("requires a group name"));
    }

    #[test]
    fn test_parse_dialect() {
        assert_eq!(parse_dialect("PostgreSQL").unwrap(), SqlDialect::Postgres);
        assert!(parse_dialect("oracle").is_err());
    }
}
