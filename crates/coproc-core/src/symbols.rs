//! Function lookup from a GNU linker map file.
//!
//! The map file is optional developer information. When none of the probed
//! locations exist the caller proceeds without symbols; a map file that exists
//! but cannot be parsed is reported, since that points at a toolchain mismatch.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::SymbolError;

/// Line that starts the informative part of a GNU linker map.
pub const MAP_MARKER: &str = "Linker script and memory map";

const TEXT_SECTION_PREFIX: &str = ".text.";

/// One location to probe for a map file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MapCandidate {
    /// Path relative to the process working directory.
    WorkingDir(PathBuf),
    /// Path relative to the directory holding the ROM.
    RomDir(PathBuf),
}

impl MapCandidate {
    /// Concrete path of this candidate for a ROM in `rom_dir`.
    #[must_use]
    pub fn resolve(&self, rom_dir: &Path) -> PathBuf {
        match self {
            Self::WorkingDir(path) => path.clone(),
            Self::RomDir(path) => rom_dir.join(path),
        }
    }
}

/// Ordered list of map file candidates; the first one that opens wins.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MapSearchPaths {
    /// Candidates in probe order.
    pub candidates: Vec<MapCandidate>,
}

impl Default for MapSearchPaths {
    fn default() -> Self {
        Self {
            candidates: vec![
                MapCandidate::WorkingDir(PathBuf::from("armcode.map")),
                MapCandidate::RomDir(PathBuf::from("armcode.map")),
                MapCandidate::RomDir(Path::new("main").join("armcode.map")),
                MapCandidate::RomDir(Path::new("main").join("bin").join("armcode.map")),
                // older DPC+ toolchains
                MapCandidate::RomDir(Path::new("custom").join("bin").join("custom2.map")),
                MapCandidate::RomDir(Path::new("arm").join("main.map")),
            ],
        }
    }
}

impl MapSearchPaths {
    /// Search list containing only paths under the ROM directory.
    #[must_use]
    pub fn rom_relative(paths: &[&str]) -> Self {
        Self {
            candidates: paths
                .iter()
                .map(|path| MapCandidate::RomDir(PathBuf::from(path)))
                .collect(),
        }
    }

    /// Every concrete path that would be probed, in order.
    #[must_use]
    pub fn probe_paths(&self, rom_dir: &Path) -> Vec<PathBuf> {
        self.candidates
            .iter()
            .map(|candidate| candidate.resolve(rom_dir))
            .collect()
    }
}

/// A function located by the map file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SymbolEntry {
    /// Start address of the function.
    pub address: u32,
    /// Display name of the function.
    pub function_name: String,
    /// Object file that contributed the function.
    pub object_file: String,
    /// 1-indexed map file line that defined the address.
    pub source_line: usize,
}

/// Address-sorted function table, immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    source: Option<PathBuf>,
}

impl SymbolTable {
    /// Probes `search` relative to `rom_dir` and parses the first map file that opens.
    ///
    /// # Errors
    ///
    /// [`SymbolError::NotFound`] when no candidate opens; read and parse
    /// failures of the opened file otherwise.
    pub fn load(rom_dir: &Path, search: &MapSearchPaths) -> Result<Self, SymbolError> {
        let searched = search.probe_paths(rom_dir);
        for path in &searched {
            let Ok(mut file) = File::open(path) else {
                log::debug!("no map file at {}", path.display());
                continue;
            };

            let mut content = String::new();
            file.read_to_string(&mut content)
                .map_err(|source| SymbolError::Io {
                    path: path.clone(),
                    source,
                })?;

            let mut table = Self::parse(&content)?;
            log::info!(
                "loaded {} functions from {}",
                table.entries.len(),
                path.display()
            );
            table.source = Some(path.clone());
            return Ok(table);
        }

        Err(SymbolError::NotFound { searched })
    }

    /// Like [`SymbolTable::load`], taking the ROM file path.
    ///
    /// # Errors
    ///
    /// See [`SymbolTable::load`].
    pub fn load_for_rom(rom_path: &Path, search: &MapSearchPaths) -> Result<Self, SymbolError> {
        let rom_dir = rom_path.parent().unwrap_or_else(|| Path::new(""));
        Self::load(rom_dir, search)
    }

    /// Parses map file text.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::MalformedAddress`] or
    /// [`SymbolError::AddressOutOfRange`] for a bad address field.
    pub fn parse(content: &str) -> Result<Self, SymbolError> {
        let Some(marker) = content.lines().position(|line| line.trim() == MAP_MARKER) else {
            log::warn!("map file has no '{MAP_MARKER}' section");
            return Ok(Self::default());
        };

        let mut entries = Vec::new();
        let mut pending = String::new();

        for (idx, line) in content.lines().enumerate().skip(marker + 1) {
            let line_number = idx + 1;
            let trimmed = line.trim_end();
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let Some(&first) = fields.first() else {
                continue;
            };

            if let Some(name) = first.strip_prefix(TEXT_SECTION_PREFIX) {
                if fields.len() == 1 {
                    pending = display_name(name).to_string();
                    continue;
                }

                // name, address, size and object all on one line
                if fields.len() >= 4 && trimmed.ends_with(".o") {
                    entries.push(SymbolEntry {
                        address: parse_address(fields[1], line_number)?,
                        function_name: display_name(name).to_string(),
                        object_file: object_file(trimmed).to_string(),
                        source_line: line_number,
                    });
                    pending.clear();
                    continue;
                }
            }

            if trimmed.ends_with(".o") && !pending.is_empty() {
                entries.push(SymbolEntry {
                    address: parse_address(first, line_number)?,
                    function_name: std::mem::take(&mut pending),
                    object_file: object_file(trimmed).to_string(),
                    source_line: line_number,
                });
            }
        }

        entries.sort_by_key(|entry| entry.address);
        Ok(Self {
            entries,
            source: None,
        })
    }

    /// The function containing `pc`: the last entry whose address is `<= pc`.
    #[must_use]
    pub fn resolve(&self, pc: u32) -> Option<&SymbolEntry> {
        let idx = self.entries.partition_point(|entry| entry.address <= pc);
        idx.checked_sub(1).map(|idx| &self.entries[idx])
    }

    /// Finds a function by display name.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries.iter().find(|entry| entry.function_name == name)
    }

    /// All functions in address order.
    pub fn functions(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.entries.iter()
    }

    /// Number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the table holds no functions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map file the table was loaded from, if it came from disk.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

fn display_name(name: &str) -> &str {
    if name == "startup.main" {
        "main"
    } else {
        name
    }
}

fn object_file(line: &str) -> &str {
    line.rsplit(char::is_whitespace).next().unwrap_or(line)
}

fn parse_address(field: &str, line: usize) -> Result<u32, SymbolError> {
    let address = parse_integer_literal(field).ok_or_else(|| SymbolError::MalformedAddress {
        line,
        field: field.to_string(),
    })?;
    u32::try_from(address).map_err(|_| SymbolError::AddressOutOfRange { line, address })
}

/// Parses an unsigned integer literal, detecting the base from its prefix.
///
/// `0x` is hexadecimal, `0b` binary, `0o` or a bare leading `0` octal and
/// anything else decimal. Underscores between digits are ignored.
#[must_use]
pub fn parse_integer_literal(field: &str) -> Option<u64> {
    let lower = field.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (&lower[1..], 8)
    } else {
        (lower.as_str(), 10)
    };

    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u64::from_str_radix(&digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    const SAMPLE_MAP: &str = "\
Archive member included to satisfy reference by file (symbol)

Memory Configuration

Name             Origin             Length             Attributes
.text.bogus
                0x00000040       0x10 boilerplate.o

Linker script and memory map

 .text          0x00000800       0x20 crt0.o
 .text.foo
                0x00001000       0x40 build/main.o
 .text.startup.main
                0x00001800       0x80 build/main.o
 .text.bar      0x00002000       0x10 build/util.o
";

    #[test]
    fn parses_functions_after_marker() {
        let table = SymbolTable::parse(SAMPLE_MAP).expect("valid map");
        let names: Vec<&str> = table
            .functions()
            .map(|entry| entry.function_name.as_str())
            .collect();
        assert_eq!(names, vec!["foo", "main", "bar"]);

        let foo = table.find_function("foo").expect("foo present");
        assert_eq!(foo.address, 0x1000);
        assert_eq!(foo.object_file, "build/main.o");
        assert_eq!(foo.source_line, 13);
    }

    #[test]
    fn resolves_containing_function() {
        let table = SymbolTable::parse(SAMPLE_MAP).expect("valid map");
        assert_eq!(table.resolve(0x1500).map(|e| e.function_name.as_str()), Some("foo"));
        assert_eq!(table.resolve(0x1800).map(|e| e.function_name.as_str()), Some("main"));
        assert_eq!(table.resolve(0x2500).map(|e| e.function_name.as_str()), Some("bar"));
        assert_eq!(table.resolve(0x0fff), None);
    }

    #[test]
    fn object_line_without_pending_name_is_ignored() {
        let map = format!("{MAP_MARKER}\n                0x00000100       0x4 lonely.o\n");
        let table = SymbolTable::parse(&map).expect("valid map");
        assert!(table.is_empty());
    }

    #[test]
    fn missing_marker_yields_empty_table() {
        let table = SymbolTable::parse(".text.foo\n 0x10 0x4 a.o\n").expect("no error");
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_address_is_a_hard_error() {
        let map = format!("{MAP_MARKER}\n .text.foo\n                0xZZ       0x4 a.o\n");
        let err = SymbolTable::parse(&map).expect_err("bad address");
        match err {
            SymbolError::MalformedAddress { line, field } => {
                assert_eq!(line, 3);
                assert_eq!(field, "0xZZ");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn oversized_address_is_rejected() {
        let map = format!("{MAP_MARKER}\n .text.foo\n 0x100000000 0x4 a.o\n");
        let err = SymbolTable::parse(&map).expect_err("too wide");
        assert!(matches!(
            err,
            SymbolError::AddressOutOfRange {
                address: 0x1_0000_0000,
                ..
            }
        ));
    }

    #[rstest]
    #[case("0x1000", Some(0x1000))]
    #[case("0X1f", Some(0x1f))]
    #[case("4096", Some(4096))]
    #[case("010", Some(8))]
    #[case("0o17", Some(15))]
    #[case("0b101", Some(5))]
    #[case("0x_dead_beef", Some(0xdead_beef))]
    #[case("0", Some(0))]
    #[case("0x", None)]
    #[case("09", None)]
    #[case("+5", None)]
    #[case("main.o", None)]
    fn integer_literal_base_detection(#[case] field: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_integer_literal(field), expected);
    }

    #[test]
    fn default_search_order_matches_toolchain_layouts() {
        let paths = MapSearchPaths::default().probe_paths(Path::new("roms"));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("armcode.map"),
                Path::new("roms").join("armcode.map"),
                Path::new("roms").join("main").join("armcode.map"),
                Path::new("roms").join("main").join("bin").join("armcode.map"),
                Path::new("roms").join("custom").join("bin").join("custom2.map"),
                Path::new("roms").join("arm").join("main.map"),
            ]
        );
    }

    #[test]
    fn load_uses_first_candidate_that_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("main/bin")).expect("mkdir");
        fs::create_dir_all(dir.path().join("arm")).expect("mkdir");
        fs::write(
            dir.path().join("main/bin/armcode.map"),
            format!("{MAP_MARKER}\n .text.first\n 0x10 0x4 a.o\n"),
        )
        .expect("write");
        fs::write(
            dir.path().join("arm/main.map"),
            format!("{MAP_MARKER}\n .text.second\n 0x10 0x4 b.o\n"),
        )
        .expect("write");

        let search = MapSearchPaths::rom_relative(&["armcode.map", "main/bin/armcode.map", "arm/main.map"]);
        let table = SymbolTable::load(dir.path(), &search).expect("map found");
        assert_eq!(table.resolve(0x10).map(|e| e.function_name.as_str()), Some("first"));
        assert_eq!(table.source(), Some(dir.path().join("main/bin/armcode.map").as_path()));
    }

    #[test]
    fn load_reports_every_probed_path_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let search = MapSearchPaths::rom_relative(&["armcode.map", "arm/main.map"]);
        let err = SymbolTable::load(dir.path(), &search).expect_err("nothing to find");
        assert!(err.is_recoverable());
        match err {
            SymbolError::NotFound { searched } => assert_eq!(searched.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn load_for_rom_uses_rom_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("armcode.map"),
            format!("{MAP_MARKER}\n .text.startup.main\n 0x20 0x4 main.o\n"),
        )
        .expect("write");

        let rom = dir.path().join("game.bin");
        let search = MapSearchPaths::rom_relative(&["armcode.map"]);
        let table = SymbolTable::load_for_rom(&rom, &search).expect("map found");
        assert_eq!(table.resolve(0x24).map(|e| e.function_name.as_str()), Some("main"));
    }
}
