//
// main.rs
//
// Command-line entry point: expand one function and print the result as JSON
//

use std::env;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use scopetrace::config::EngineConfig;
use scopetrace::expand::expand_function_in;

fn print_usage() {
    println!(
        "scopetrace {}, cross-file scope resolution for TypeScript functions.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: scopetrace [OPTIONS]

Reads the function text from --function-file, or from stdin when omitted,
and prints the expanded function as JSON (`null` when no function matches).

Available options:

--root <DIR>                 Project root (default: current directory)
--search-dir <DIR>           Directory searched for the function (default: the root)
--function-file <FILE>       File holding the exact function text
--config <FILE>              JSON engine configuration merged over the defaults
--server <COMMAND>           Code-intelligence server command line
--timeout-ms <MS>            Per-request timeout
--sorted                     Visit directory entries in sorted order
--pretty                     Pretty-print the JSON output
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[derive(Default)]
struct Options {
    root: Option<PathBuf>,
    search_dir: Option<PathBuf>,
    function_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
    server: Option<String>,
    timeout_ms: Option<u64>,
    sorted: bool,
    pretty: bool,
}

fn value_of(argv: &mut env::Args, flag: &str) -> anyhow::Result<String> {
    argv.next()
        .ok_or_else(|| anyhow::anyhow!("Missing value for '{flag}'"))
}

impl Options {
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let value = serde_json::from_str(&text)
                    .with_context(|| format!("Invalid JSON in {}", path.display()))?;
                EngineConfig::from_json(value)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))?
            }
            None => EngineConfig::default(),
        };

        if let Some(server) = &self.server {
            let mut parts = server.split_whitespace().map(str::to_string);
            config.server_command = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Empty '--server' command"))?;
            config.server_args = parts.collect();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }
        if self.sorted {
            config.sorted_traversal = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut options = Options::default();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--root" => options.root = Some(value_of(&mut argv, "--root")?.into()),
            "--search-dir" => options.search_dir = Some(value_of(&mut argv, "--search-dir")?.into()),
            "--function-file" => {
                options.function_file = Some(value_of(&mut argv, "--function-file")?.into())
            }
            "--config" => options.config_file = Some(value_of(&mut argv, "--config")?.into()),
            "--server" => options.server = Some(value_of(&mut argv, "--server")?),
            "--timeout-ms" => {
                let value = value_of(&mut argv, "--timeout-ms")?;
                options.timeout_ms = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid '--timeout-ms' value '{value}'"))?,
                );
            }
            "--sorted" => options.sorted = true,
            "--pretty" => options.pretty = true,
            "--version" => {
                println!("scopetrace {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    env_logger::init();

    let config = options.engine_config()?;
    let root = match options.root.clone() {
        Some(root) => root,
        None => env::current_dir().context("Failed to determine the current directory")?,
    };
    let search_dir = options.search_dir.clone().unwrap_or_else(|| root.clone());

    let text = match &options.function_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read function file {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read function text from stdin")?;
            text
        }
    };

    let result = expand_function_in(&root, &search_dir, &text, config).await?;
    let output = if options.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{output}");
    Ok(())
}
