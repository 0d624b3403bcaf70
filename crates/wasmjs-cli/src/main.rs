//! wasmjs compiler CLI

use clap::{Parser, Subcommand};
use wasmjs_codegen::{compile, CodegenOptions};
use wasmjs_error::DiagnosticRenderer;
use wasmjs_ir::validate::check_module;
use wasmjs_ir::Module;
use wasmjs_runtime::{Factory, ForeignTable};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "wasmjs")]
#[command(author = "Guilherme Mendes")]
#[command(version = "0.1.0")]
#[command(about = "Compiles typed IR modules to asm.js-style JavaScript", long_about = None)]
struct Cli {
    /// Linear memory size in bytes (overrides the module)
    #[arg(long, global = true, value_name = "BYTES")]
    memory: Option<u32>,

    /// Use shared memory and native atomics
    #[arg(long, global = true)]
    shared_memory: bool,

    /// Log compiler and runtime activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads and validates a module
    Check {
        /// Input file (JSON IR)
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Shows the desugared IR (debug)
    Ir {
        /// Input file (JSON IR)
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Generates JavaScript from a module
    Emit {
        /// Input file (JSON IR)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Spaces per indentation level
        #[arg(long, default_value_t = 2)]
        indent: usize,
    },

    /// Compiles a module and calls one of its exports
    Run {
        /// Input file (JSON IR)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Export to call
        #[arg(long, default_value = "main")]
        entry: String,

        /// Numeric arguments passed to the export
        #[arg(value_name = "ARGS", allow_negative_numbers = true)]
        args: Vec<f64>,
    },
}

fn main() {
    let cli = Cli::parse();
    wasmjs_runtime::init_logging(cli.verbose);

    match &cli.command {
        Commands::Check { input } => {
            println!("Checking: {}\n", input.display());
            let module = load(&cli, input);
            println!(
                "  [ok] Load: {} functions, {} externs",
                module.funcs.len(),
                module.externs.len()
            );
            validate(&module);
            println!("  [ok] Validate: {} bytes of memory", module.config.memory.fixed);
            println!("\nNo errors found!");
        }

        Commands::Ir { input } => {
            println!("Desugaring: {}\n", input.display());
            let mut module = load(&cli, input);
            validate(&module);

            if let Err(e) = wasmjs_ir::desugar::process(&mut module) {
                eprintln!("Desugar error: {}", e);
                std::process::exit(1);
            }

            println!("{}", module);

            println!("Statistics:");
            println!("   Functions: {}", module.funcs.len());
            println!("   Exports: {}", module.exports().count());
            println!("   Externs: {}", module.externs.len());
            println!("   Memory: {} bytes", module.config.memory.fixed);
            println!("   Shared memory: {}", module.config.use_shared_memory);
        }

        Commands::Emit {
            input,
            output,
            indent,
        } => {
            let module = load(&cli, input);
            validate(&module);
            let program = match compile(module) {
                Ok(program) => program,
                Err(e) => {
                    eprintln!("Codegen error: {}", e);
                    std::process::exit(1);
                }
            };
            let source = program.source_with(&CodegenOptions { indent: *indent });

            match output {
                Some(path) => {
                    if let Err(e) = fs::write(path, &source) {
                        eprintln!("Error writing file: {}", e);
                        std::process::exit(1);
                    }
                    println!("Generated: {}", path.display());
                }
                None => println!("{}", source),
            }
        }

        Commands::Run { input, entry, args } => {
            println!("Running: {}\n", input.display());
            let module = load(&cli, input);
            validate(&module);
            println!("  [ok] Validate");

            let program = match compile(module) {
                Ok(program) => program,
                Err(e) => {
                    eprintln!("Codegen error: {}", e);
                    std::process::exit(1);
                }
            };
            println!("  [ok] Codegen: {} exports", program.exports.len());

            let factory = Factory::new(program);
            let instance = match factory.instantiate(ForeignTable::new(), factory.worker_param()) {
                Ok(instance) => instance,
                Err(e) => {
                    eprintln!("Instantiation error: {}", e);
                    std::process::exit(1);
                }
            };
            println!("  [ok] Instantiate\n");

            match instance.call(entry, args) {
                Ok(result) => println!("JS result: {}", result),
                Err(e) => {
                    eprintln!("Runtime error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Reads a module and applies the command-line configuration overrides
fn load(cli: &Cli, input: &Path) -> Module {
    let mut module = match Module::from_file(input) {
        Ok(module) => module,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };
    if let Some(memory) = cli.memory {
        module.config.memory.fixed = memory;
    }
    if cli.shared_memory {
        module.config.use_shared_memory = true;
    }
    module
}

fn validate(module: &Module) {
    let diagnostics = check_module(module);
    if diagnostics.is_empty() {
        return;
    }

    let renderer = DiagnosticRenderer::new();
    for diag in diagnostics.iter() {
        eprintln!("{}", renderer.render(diag));
    }
    if diagnostics.has_errors() {
        eprintln!("\n{} error(s) found", diagnostics.error_count());
        std::process::exit(1);
    }
}
