//! CLI entry point for the `coproc-map` developer tool.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use coproc_core::{parse_integer_literal, MapSearchPaths, SymbolError, SymbolTable};
#[cfg(test)]
use tempfile as _;

const USAGE_TEXT: &str = "\
Usage: coproc-map <command> [options]

Commands:
  symbols <rom> [--map <file>]              List functions from the ROM's map file
  resolve <rom> <pc>... [--map <file>]      Name the function containing each PC

Options:
  -m, --map <file>  Read this map file instead of probing next to the ROM
  -h, --help        Show this help message

Examples:
  coproc-map symbols game.bin
  coproc-map resolve game.bin 0x8000 0x80a4
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Symbols(SymbolsArgs),
    Resolve(ResolveArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct SymbolsArgs {
    rom: PathBuf,
    map: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
struct ResolveArgs {
    rom: PathBuf,
    map: Option<PathBuf>,
    pcs: Vec<u32>,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "symbols" => parse_symbols_args(args)
            .map(Command::Symbols)
            .map(ParseResult::Command),
        "resolve" => parse_resolve_args(args)
            .map(Command::Resolve)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Splits `--map` out of the argument list, returning it and the positionals.
#[allow(clippy::while_let_on_iterator)]
fn split_options(
    mut args: impl Iterator<Item = OsString>,
) -> Result<(Option<PathBuf>, Vec<String>), String> {
    let mut map: Option<PathBuf> = None;
    let mut positionals = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "-m" || arg == "--map" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --map".to_string())?;
            map = Some(PathBuf::from(value));
            continue;
        }

        let text = arg.to_string_lossy().to_string();
        if text.starts_with('-') {
            return Err(format!("unknown option: {text}"));
        }
        positionals.push(text);
    }

    Ok((map, positionals))
}

fn parse_symbols_args(args: impl Iterator<Item = OsString>) -> Result<SymbolsArgs, String> {
    let (map, positionals) = split_options(args)?;
    match positionals.as_slice() {
        [] => Err("missing ROM path".to_string()),
        [rom] => Ok(SymbolsArgs {
            rom: PathBuf::from(rom),
            map,
        }),
        _ => Err("multiple ROM paths provided".to_string()),
    }
}

fn parse_resolve_args(args: impl Iterator<Item = OsString>) -> Result<ResolveArgs, String> {
    let (map, positionals) = split_options(args)?;
    let (rom, pcs) = positionals
        .split_first()
        .ok_or_else(|| "missing ROM path".to_string())?;
    if pcs.is_empty() {
        return Err("missing program counter".to_string());
    }

    let pcs = pcs
        .iter()
        .map(|text| {
            parse_integer_literal(text)
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| format!("invalid program counter: {text}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ResolveArgs {
        rom: PathBuf::from(rom),
        map,
        pcs,
    })
}

fn load_symbols(rom: &Path, map: Option<&Path>) -> Result<SymbolTable, i32> {
    let result = match map {
        Some(path) => fs::read_to_string(path)
            .map_err(|source| SymbolError::Io {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|content| SymbolTable::parse(&content)),
        None => SymbolTable::load_for_rom(rom, &MapSearchPaths::default()),
    };

    result.map_err(|e| {
        eprintln!("error: {e}");
        if let SymbolError::NotFound { searched } = &e {
            for path in searched {
                eprintln!("  tried {}", path.display());
            }
            2
        } else {
            1
        }
    })
}

fn run_symbols(args: &SymbolsArgs) -> Result<(), i32> {
    let table = load_symbols(&args.rom, args.map.as_deref())?;
    if let Some(source) = table.source() {
        log::info!("using {}", source.display());
    }

    for entry in table.functions() {
        println!(
            "{:08x}  {:<32} {}",
            entry.address, entry.function_name, entry.object_file
        );
    }
    println!("{} functions", table.len());
    Ok(())
}

fn format_resolution(table: &SymbolTable, pc: u32) -> String {
    table.resolve(pc).map_or_else(
        || format!("{pc:08x}  ??"),
        |entry| {
            let offset = pc - entry.address;
            if offset == 0 {
                format!("{pc:08x}  {}", entry.function_name)
            } else {
                format!("{pc:08x}  {}+0x{offset:x}", entry.function_name)
            }
        },
    )
}

fn run_resolve(args: &ResolveArgs) -> Result<(), i32> {
    let table = load_symbols(&args.rom, args.map.as_deref())?;
    for pc in &args.pcs {
        println!("{}", format_resolution(&table, *pc));
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(command)) => {
            log::debug!("{command:?}");
            let result = match &command {
                Command::Symbols(args) => run_symbols(args),
                Command::Resolve(args) => run_resolve(args),
            };
            match result {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use coproc_core::MAP_MARKER;

    fn os(args: &[&str]) -> impl Iterator<Item = OsString> {
        args.iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_symbols_command() {
        let result = parse_symbols_args(os(&["game.bin", "--map", "out/armcode.map"]))
            .expect("valid symbols args should parse");
        assert_eq!(
            result,
            SymbolsArgs {
                rom: PathBuf::from("game.bin"),
                map: Some(PathBuf::from("out/armcode.map")),
            }
        );
    }

    #[test]
    fn parses_resolve_command_with_mixed_bases() {
        let result = parse_resolve_args(os(&["game.bin", "0x8000", "4096"]))
            .expect("valid resolve args should parse");
        assert_eq!(result.pcs, vec![0x8000, 4096]);
        assert_eq!(result.map, None);
    }

    #[test]
    fn resolve_requires_a_pc() {
        let error = parse_resolve_args(os(&["game.bin"])).expect_err("no pc");
        assert!(error.contains("missing program counter"));
    }

    #[test]
    fn resolve_rejects_bad_pc() {
        let error = parse_resolve_args(os(&["game.bin", "main"])).expect_err("bad pc");
        assert!(error.contains("invalid program counter"));
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(os(&["--help"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = parse_args(os(&["disasm"])).expect_err("unknown command should fail parse");
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn rejects_unknown_option() {
        let error = parse_symbols_args(os(&["game.bin", "--verbose"])).expect_err("bad option");
        assert!(error.contains("unknown option"));
    }

    #[test]
    fn formats_offsets_within_functions() {
        let map = format!("{MAP_MARKER}\n .text.kernel\n 0x8000 0x40 main.o\n");
        let table = SymbolTable::parse(&map).expect("valid map");
        assert_eq!(format_resolution(&table, 0x8000), "00008000  kernel");
        assert_eq!(format_resolution(&table, 0x8010), "00008010  kernel+0x10");
        assert_eq!(format_resolution(&table, 0x10), "00000010  ??");
    }
}
