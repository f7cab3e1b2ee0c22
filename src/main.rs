//! elfmod - ELF32 dynamic module loader
//!
//! Command-line front end for inspecting and loading shared objects.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Command, InspectArgs, LoadArgs};
use em_core::{logging, Config};
use em_loader::{
    validate_header, ElfImage, FileImageProvider, LoadLayout, Module, ModuleLoader, ModuleRegistry,
};
use serde::Serialize;
use std::process::ExitCode;

#[derive(Serialize)]
struct SegmentReport {
    index: usize,
    kind: u32,
    offset: u32,
    vaddr: u32,
    filesz: u32,
    memsz: u32,
    flags: String,
    align: u32,
}

#[derive(Serialize)]
struct InspectReport {
    file: String,
    machine: u16,
    segments: Vec<SegmentReport>,
    min_alloc: usize,
    max_alloc: usize,
    max_align: usize,
    module_size: usize,
}

#[derive(Serialize)]
struct ResolvedSymbol {
    symbol: String,
    module: Option<String>,
    address: Option<usize>,
    size: Option<u32>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::config_path()).context("failed to load config")?,
    };
    if let Some(level) = cli.log_level {
        config.debug.log_level = level;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn inspect(config: &Config, args: &InspectArgs, json: bool) -> Result<()> {
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let image = ElfImage::parse(&bytes)?;
    validate_header(image.header(), &config.target)
        .with_context(|| format!("{} is not a loadable module", args.file.display()))?;

    let phdrs = image.program_headers()?;
    let layout = LoadLayout::compute(&phdrs)?;

    let report = InspectReport {
        file: args.file.display().to_string(),
        machine: image.header().e_machine,
        segments: phdrs
            .iter()
            .enumerate()
            .map(|(index, ph)| SegmentReport {
                index,
                kind: ph.p_type,
                offset: ph.p_offset,
                vaddr: ph.p_vaddr,
                filesz: ph.p_filesz,
                memsz: ph.p_memsz,
                flags: format!("{:?}", ph.flags()),
                align: ph.p_align,
            })
            .collect(),
        min_alloc: layout.min_alloc,
        max_alloc: layout.max_alloc,
        max_align: layout.max_align,
        module_size: layout.size(),
    };

    if json {
        return print_json(&report);
    }

    println!("{}: machine {}", report.file, report.machine);
    println!(
        "  #  type        offset     vaddr      filesz     memsz      align"
    );
    for s in &report.segments {
        println!(
            "  {:<2} 0x{:08x}  0x{:08x} 0x{:08x} 0x{:08x} 0x{:08x} 0x{:x} {}",
            s.index, s.kind, s.offset, s.vaddr, s.filesz, s.memsz, s.align, s.flags
        );
    }
    println!(
        "allocation 0x{:x}..0x{:x} (0x{:x} bytes, aligned to 0x{:x})",
        report.min_alloc, report.max_alloc, report.module_size, report.max_align
    );
    Ok(())
}

fn load(config: &Config, args: &LoadArgs, json: bool) -> Result<()> {
    let mut provider = FileImageProvider::from_config(&config.loader);
    for dir in args.search_paths.iter().rev() {
        provider.add_search_path(dir.clone());
    }

    let loader = ModuleLoader::from_config(config);
    let registry = ModuleRegistry::from_config(&config.loader);

    for name in &args.names {
        let module = Module::alloc_bounded(name, config.loader.max_name_len);
        registry
            .load(&loader, &provider, module)
            .with_context(|| format!("failed to load module '{}'", name))?;
    }

    let resolved: Vec<ResolvedSymbol> = args
        .symbols
        .iter()
        .map(|symbol| match registry.find_symbol(symbol) {
            Some((module, sym)) => ResolvedSymbol {
                symbol: symbol.clone(),
                module: Some(module.name().to_string()),
                address: Some(sym.address),
                size: Some(sym.size),
            },
            None => ResolvedSymbol {
                symbol: symbol.clone(),
                module: None,
                address: None,
                size: None,
            },
        })
        .collect();

    if json {
        #[derive(Serialize)]
        struct LoadReport {
            modules: Vec<em_loader::ModuleInfo>,
            symbols: Vec<ResolvedSymbol>,
        }
        let modules = registry.iter().filter_map(|m| m.info()).collect();
        return print_json(&LoadReport {
            modules,
            symbols: resolved,
        });
    }

    for module in registry.iter() {
        let Some(info) = module.info() else { continue };
        println!(
            "{}: base 0x{:x}, 0x{:x} bytes at 0x{:x}",
            info.name, info.base_addr, info.module_size, info.region_start
        );
        if let Some(soname) = &info.soname {
            println!("  soname: {}", soname);
        }
        for dep in &info.dependencies {
            println!("  needs: {} (not resolved)", dep.name);
        }
        if info.relocations.has_pending_relocations() {
            println!("  relocations present but not applied");
        }
    }

    let mut missing = 0;
    for r in &resolved {
        match (&r.module, r.address) {
            (Some(module), Some(address)) => {
                println!("{} = 0x{:x} in {}", r.symbol, address, module)
            }
            _ => {
                println!("{}: not found", r.symbol);
                missing += 1;
            }
        }
    }
    if missing > 0 {
        bail!("{} symbol(s) could not be resolved", missing);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    logging::init(&config.debug);
    tracing::debug!("Configuration: {:?}", config);

    match &cli.command {
        Command::Inspect(args) => inspect(&config, args, cli.json),
        Command::Load(args) => load(&config, args, cli.json),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
