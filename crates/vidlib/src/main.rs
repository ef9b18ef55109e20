use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgGroup, Parser, Subcommand};
use vidlib_core::database::ExpectedVersion;
use vidlib_core::memory::PointerWidth;
use vidlib_core::{Address, FileVersion, LoadOptions, Result as VidlibResult, SymbolDatabase, VidlibError};
use vidlib_utils::{info, init_logging, init_logging_to_file};

/// Inspect version-independent symbol databases.
#[derive(Parser, Debug)]
#[command(name = "vidlib")]
#[command(version)]
#[command(about = "Inspect version-independent symbol databases", long_about = None)]
struct Cli
{
    /// Treat the target as a 32-bit binary
    #[arg(long, global = true, default_value_t = false)]
    bits32: bool,

    /// Write logs to ~/.vidlib instead of the console
    #[arg(long, global = true, default_value_t = false)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Show the header and record counts of a database
    Info
    {
        /// Database file
        db: PathBuf,
        /// Check the database against this product version (e.g. 1.5.97)
        #[arg(long)]
        expect: Option<String>,
        /// Library version to check when --expect is given
        #[arg(long, requires = "expect")]
        library_version: Option<i32>,
    },
    /// Find the function containing an address
    Function
    {
        /// Database file
        db: PathBuf,
        /// Address (hex 0x1000 or decimal); an offset unless --base is given
        #[arg(value_parser = parse_number)]
        address: u64,
        /// Module base the address is relative to
        #[arg(long, value_parser = parse_number)]
        base: Option<u64>,
    },
    /// Look up a type by VID or by vtable offset
    #[command(group(ArgGroup::new("key").required(true).args(["vid", "vtable"])))]
    Type
    {
        /// Database file
        db: PathBuf,
        /// Version independent id of the type
        #[arg(long, value_parser = parse_number)]
        vid: Option<u64>,
        /// Vtable offset from the module base
        #[arg(long, value_parser = parse_number)]
        vtable: Option<u64>,
    },
    /// Look up a global variable by VID
    Global
    {
        /// Database file
        db: PathBuf,
        /// Version independent id
        #[arg(value_parser = parse_number)]
        vid: u64,
    },
    /// Write every function and global VID with its offset
    DumpVids
    {
        /// Database file
        db: PathBuf,
        /// Output file, or - for stdout
        out: PathBuf,
    },
    /// List the entries of a type instance list
    Instances
    {
        /// Database file
        db: PathBuf,
        /// List id
        #[arg(value_parser = parse_number)]
        list_id: u64,
    },
}

fn main()
{
    let cli = Cli::parse();

    // Initialize logging (reads from RUST_LOG env var)
    let guard = if cli.log_to_file {
        init_logging_to_file(None, None).map(|(_, guard)| guard)
    } else {
        init_logging()
    };
    let _guard = match guard {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn parse_number(s: &str) -> Result<u64, String>
{
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number `{s}`: {e}"))
}

fn load(path: &Path, bits32: bool, base: Option<u64>) -> VidlibResult<SymbolDatabase>
{
    let width = if bits32 { PointerWidth::Bits32 } else { PointerWidth::Bits64 };
    let options = LoadOptions::new(Address::new(base.unwrap_or(0))).with_pointer_width(width);
    info!(path = %path.display(), "Opening symbol database");
    SymbolDatabase::load(path, options)
}

fn run_command(cli: Cli) -> VidlibResult<()>
{
    let bits32 = cli.bits32;
    match cli.command {
        Commands::Info {
            db,
            expect,
            library_version,
        } => {
            let db = load(&db, bits32, None)?;
            print_info(&db);
            if let Some(expect) = expect {
                let file_version = FileVersion::parse(&expect)
                    .ok_or_else(|| VidlibError::InvalidArgument(format!("`{expect}` is not a product version")))?;
                db.validate(&ExpectedVersion {
                    file_version,
                    library_version,
                    hash: None,
                })?;
                println!("  Matches {file_version}");
            }
            Ok(())
        }
        Commands::Function { db, address, base } => {
            let db = load(&db, bits32, base)?;
            match db.function_at(Address::new(address), base.is_some()) {
                Some(function) => {
                    println!("{}", function.display_name(false));
                    println!("  VID:   {}", function.vid);
                    println!("  Range: 0x{:X}..0x{:X}", function.begin, function.end);
                    if let Some(full_name) = &function.full_name {
                        println!("  Name:  {full_name}");
                    }
                }
                None => println!("No function contains 0x{address:X}"),
            }
            Ok(())
        }
        Commands::Type { db, vid, vtable } => {
            let db = load(&db, bits32, None)?;
            let found = match (vid, vtable) {
                (Some(vid), _) => db.type_info(vid),
                (None, Some(vtable)) => db.type_at_vtable(Address::new(vtable), false),
                (None, None) => None,
            };
            match found {
                Some(type_info) => {
                    println!("{}", type_info.name);
                    println!("  VID:    {}", type_info.vid);
                    if type_info.vtable != 0 {
                        println!("  Vtable: 0x{:X}", type_info.vtable);
                    }
                    if let Some(size) = type_info.size {
                        println!("  Size:   0x{size:X}");
                    }
                    for field in &type_info.fields {
                        let offset = field.begin.map_or_else(|| "?".to_string(), |begin| format!("0x{begin:X}"));
                        println!(
                            "  [{:>3}] {offset:>8} {} {}",
                            field.field_id,
                            field.type_name.as_deref().unwrap_or("?"),
                            field.short_name.as_deref().unwrap_or("")
                        );
                    }
                }
                None => println!("Type not found"),
            }
            Ok(())
        }
        Commands::Global { db, vid } => {
            let db = load(&db, bits32, None)?;
            match db.global(vid) {
                Some(global) => {
                    println!("{}", global.short_name.as_deref().unwrap_or("unk"));
                    println!("  Offset: 0x{:X}", global.begin);
                    if let Some(type_name) = &global.type_name {
                        println!("  Type:   {type_name}");
                    }
                }
                None => println!("Global {vid} not found"),
            }
            Ok(())
        }
        Commands::DumpVids { db, out } => {
            let db = load(&db, bits32, None)?;
            if out.as_os_str() == "-" {
                db.dump_vids(io::stdout().lock())
            } else {
                let mut writer = BufWriter::new(File::create(&out)?);
                db.dump_vids(&mut writer)?;
                writer.flush()?;
                info!(path = %out.display(), "Wrote VID dump");
                Ok(())
            }
        }
        Commands::Instances { db, list_id } => {
            let db = load(&db, bits32, None)?;
            let list_id = u32::try_from(list_id)
                .map_err(|_| VidlibError::InvalidArgument(format!("list id {list_id} is out of range")))?;
            let entries = db.type_instances(list_id);
            println!("List {list_id}: {} entries", entries.len());
            for entry in entries {
                let name = entry
                    .type_vid
                    .and_then(|vid| db.type_info(vid))
                    .map_or("?", |info| info.name.as_str());
                println!("  {:?}..{:?} {name}", entry.begin, entry.end);
            }
            Ok(())
        }
    }
}

fn print_info(db: &SymbolDatabase)
{
    println!("Symbol Database:");
    println!("  Format:          {}", db.format_version());
    println!("  File Version:    {}", db.file_version());
    if db.is_aliased() {
        println!("  Requested:       {} (alias)", db.requested_version());
    }
    println!("  Library Version: {}", db.library_version());
    println!("  Base Offset:     0x{:X}", db.library_base_offset());
    println!("  Hash:            0x{:X}", db.hash());
    println!("  Types:           {}", db.types().len());
    println!("  Functions:       {}", db.functions().len());
    println!("  Globals:         {}", db.globals().len());
    println!("  Registrations:   {}", db.registrations().len());
    println!("  Instance Lists:  {}", db.type_instance_list_ids().count());
    println!("  Cached Values:   {}", db.cached_values().len());
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_number()
    {
        assert_eq!(parse_number("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_number("0X1_4000_0000").unwrap(), 0x1_4000_0000);
        assert_eq!(parse_number("4096").unwrap(), 4096);
        assert!(parse_number("0xZZ").is_err());
    }

    #[test]
    fn test_type_requires_a_key()
    {
        assert!(Cli::try_parse_from(["vidlib", "type", "db.vdb"]).is_err());
        assert!(Cli::try_parse_from(["vidlib", "type", "db.vdb", "--vid", "7"]).is_ok());
        assert!(Cli::try_parse_from(["vidlib", "type", "db.vdb", "--vid", "7", "--vtable", "0x10"]).is_err());
    }
}
