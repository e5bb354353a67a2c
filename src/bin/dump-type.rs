use clap::Parser;
use dotnet_embed::{
    metadata::DllResolver, ClassHandle, ExceptionRef, Runtime, RuntimeConfig, RuntimeError,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump the members of a type as the runtime sees them"
)]
struct Args {
    /// Directory containing the assembly and its dependencies
    #[arg(short, long, value_name = "FOLDER")]
    assemblies: PathBuf,
    /// Name of the core library
    #[arg(long, default_value = "System.Private.CoreLib")]
    corlib: String,
    /// The assembly to search in (e.g. System.Runtime)
    assembly: String,
    /// The full name of the type to dump (e.g. System.Object); lists all types if omitted
    type_name: Option<String>,
    /// Also list non-exported types
    #[arg(long)]
    all: bool,
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// `--verbose` shows per-member tracing from the lazy reflection layer.
    fn log_level(&self) -> Level {
        if self.verbose {
            Level::TRACE
        } else {
            Level::WARN
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .init();

    let config = RuntimeConfig::default()
        .with_corlib(&args.corlib)
        .with_assembly_root(&args.assemblies);
    let runtime = match Runtime::builder()
        .config(config)
        .resolver(DllResolver::new(&args.assemblies))
        .initialize()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let code = match dump(&runtime, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Unhandled exception. {e}");
            ExitCode::FAILURE
        }
    };
    runtime.shutdown();
    code
}

fn dump(runtime: &Runtime, args: &Args) -> Result<(), ExceptionRef> {
    let assembly = runtime.load_assembly(&args.assembly)?;
    let module = runtime
        .assembly(assembly)
        .map_err(|e| runtime.raise_error_as_exception(e))?
        .module();

    let Some(type_name) = &args.type_name else {
        for class in runtime.get_classes(module, !args.all) {
            println!("{}", full_name(runtime, class)?);
        }
        return Ok(());
    };

    match runtime.get_class_by_name(module, type_name, false) {
        Some(class) => print_class(runtime, class),
        None => Err(runtime.raise_error_as_exception(RuntimeError::TypeLoad(format!(
            "{type_name} in assembly {}",
            args.assembly
        )))),
    }
}

fn full_name(runtime: &Runtime, class: ClassHandle) -> Result<String, ExceptionRef> {
    runtime
        .class(class)
        .map(|c| c.full_name().to_string())
        .map_err(|e| runtime.raise_error_as_exception(e))
}

fn print_class(runtime: &Runtime, class: ClassHandle) -> Result<(), ExceptionRef> {
    let raise = |e: RuntimeError| runtime.raise_error_as_exception(e);
    println!("{}", full_name(runtime, class)?);
    let ancestors = runtime
        .ancestors(class)
        .skip(1)
        .map(|a| full_name(runtime, a))
        .collect::<Result<Vec<_>, _>>()?;
    if !ancestors.is_empty() {
        println!("  extends {}", ancestors.join(" -> "));
    }
    println!("  by value: {}", runtime.get_class_byval_arg(class).map_err(raise)?);

    println!("\nInterfaces:");
    for interface in runtime.get_class_interfaces(class)?.iter() {
        println!("  - {}", full_name(runtime, *interface)?);
    }

    println!("\nNested types:");
    for nested in runtime.get_class_nested_classes(class)?.iter() {
        println!("  - {}", full_name(runtime, *nested)?);
    }

    println!("\nFields:");
    for field in runtime.get_class_fields(class)?.iter() {
        let modifier = if field.is_static() { "static " } else { "" };
        println!("  - {modifier}{} {}", field.sig(), field.name());
    }

    println!("\nMethods:");
    for method in runtime.get_class_methods(class)?.iter() {
        println!(
            "  - {method} [{:?}; args: {} slots, return: {} slots]",
            method.implementation(),
            method.total_arg_stack_object_size(),
            method.return_value_stack_object_size()
        );
    }

    println!("\nProperties:");
    for property in runtime.get_class_properties(class)?.iter() {
        println!(
            "  - {} {} (get: {}, set: {})",
            property.sig(),
            property.name(),
            property.getter().map_or("-", |m| m.name()),
            property.setter().map_or("-", |m| m.name())
        );
    }

    println!("\nEvents:");
    for event in runtime.get_class_events(class)?.iter() {
        println!("  - {}", event.name());
    }

    if runtime.is_value_type(class) {
        let layout = runtime.value_layout(class).map_err(raise)?;
        println!("\nLayout: {} bytes, align {}", layout.size, layout.align);
    }
    Ok(())
}
