//! Gzip-compressed database files and alias redirection.
//!
//! ## Alias files
//!
//! An alias file contains only a header whose alias byte is set, followed by
//! the version it redirects to. Because database files are named after the
//! product version (`Game.1_5_97_0.bin`), the loader replaces the last
//! occurrence of the alias file's own version token in its path with the
//! target token and loads that file instead. Aliases may chain up to
//! [`MAX_ALIAS_DEPTH`] times.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use super::codec::{Reader, Writer};
use super::records::{FunctionInfo, GlobalInfo, TypeInfo, TypeInstanceInfo, TypeRegistration};
use super::{DatabaseBuilder, LoadOptions, SymbolDatabase};
use crate::error::{Result, VidlibError};
use crate::types::FileVersion;

/// Format version written by [`SymbolDatabase::save`].
pub const FORMAT_VERSION: i32 = 2;

/// Newest format version the reader accepts.
const MAX_FORMAT_VERSION: i32 = 3;

/// Maximum number of alias redirections followed while loading.
pub const MAX_ALIAS_DEPTH: u32 = 10;

fn read_version<R: Read>(reader: &mut Reader<R>) -> Result<FileVersion>
{
    let mut parts = [0i32; 4];
    for part in &mut parts {
        *part = reader.i32()?;
    }
    Ok(FileVersion(parts))
}

fn write_version<W: Write>(writer: &mut Writer<W>, version: FileVersion) -> Result<()>
{
    for part in version.parts() {
        writer.i32(part)?;
    }
    Ok(())
}

/// Path of the file an alias at `path` redirects to.
fn alias_target_path(path: &Path, from: FileVersion, to: FileVersion) -> Result<PathBuf>
{
    let token = from.file_token();
    let mismatch = || VidlibError::AliasPathMismatch {
        path: path.to_path_buf(),
        token: token.clone(),
    };

    let current = path.to_str().ok_or_else(mismatch)?;
    let at = current.rfind(&token).ok_or_else(mismatch)?;

    let mut target = String::with_capacity(current.len());
    target.push_str(&current[..at]);
    target.push_str(&to.file_token());
    target.push_str(&current[at + token.len()..]);

    if target == current {
        return Err(VidlibError::AliasSelfReference(path.to_path_buf()));
    }
    Ok(PathBuf::from(target))
}

impl SymbolDatabase
{
    /// Load a database file, following alias files.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file (or an alias target) cannot be opened
    /// - `UnsupportedFormatVersion`, `CorruptDatabase`: bad file contents
    /// - `AliasDepthExceeded`, `AliasSelfReference`, `AliasPathMismatch`: bad alias chain
    /// - `DuplicateVid`, `DuplicateVtable`: conflicting records
    pub fn load(path: impl AsRef<Path>, options: LoadOptions) -> Result<Self>
    {
        Self::load_at_depth(path.as_ref(), options, 0)
    }

    fn load_at_depth(path: &Path, options: LoadOptions, depth: u32) -> Result<Self>
    {
        debug!(path = %path.display(), depth, "Loading symbol database");
        let file = File::open(path)?;
        let mut reader = Reader::new(BufReader::new(GzDecoder::new(file)));

        let format_version = reader.i32()?;
        if !(FORMAT_VERSION..=MAX_FORMAT_VERSION).contains(&format_version) {
            return Err(VidlibError::UnsupportedFormatVersion(format_version));
        }
        let library_version = reader.i32()?;
        let file_version = read_version(&mut reader)?;

        if reader.u8()? != 0 {
            if depth >= MAX_ALIAS_DEPTH {
                return Err(VidlibError::AliasDepthExceeded {
                    depth,
                    path: path.to_path_buf(),
                });
            }
            let target_version = read_version(&mut reader)?;
            let target = alias_target_path(path, file_version, target_version)?;
            info!(
                from = %file_version,
                to = %target_version,
                target = %target.display(),
                "Following symbol database alias"
            );

            let mut database = Self::load_at_depth(&target, options, depth + 1)?;
            // Outermost alias wins: it is the version that was asked for.
            database.requested_version = Some(file_version);
            return Ok(database);
        }

        let mut builder = DatabaseBuilder::new();
        builder
            .format_version(format_version)
            .library_version(library_version)
            .file_version(file_version)
            .library_base_offset(reader.u64()?)
            .hash(reader.u64()?);
        read_body(&mut reader, &mut builder)?;

        let database = builder.build(options)?;
        info!(
            version = %database.file_version,
            library_version,
            functions = database.functions.len(),
            types = database.types.len(),
            "Loaded symbol database"
        );
        Ok(database)
    }

    /// Write the database to `path` (format version [`FORMAT_VERSION`]).
    ///
    /// The file version written is [`file_version`](Self::file_version); a
    /// database loaded through an alias is saved as the target version.
    ///
    /// ## Errors
    ///
    /// `Io` if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()>
    {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = Writer::new(GzEncoder::new(BufWriter::new(file), Compression::default()));

        writer.i32(FORMAT_VERSION)?;
        writer.i32(self.library_version)?;
        write_version(&mut writer, self.file_version)?;
        writer.u8(0)?;
        writer.u64(self.library_base_offset)?;
        writer.u64(self.hash)?;
        self.write_body(&mut writer)?;

        writer.into_inner().finish()?.flush()?;
        debug!(path = %path.display(), "Saved symbol database");
        Ok(())
    }

    /// Write an alias file declaring that `file_version` uses the data of
    /// `target_version`.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: both versions are equal
    /// - `Io`: the file cannot be written
    pub fn save_alias(path: impl AsRef<Path>, file_version: FileVersion, target_version: FileVersion) -> Result<()>
    {
        if file_version == target_version {
            return Err(VidlibError::InvalidArgument(format!(
                "alias of {file_version} cannot point to itself"
            )));
        }
        let file = File::create(path.as_ref())?;
        let mut writer = Writer::new(GzEncoder::new(BufWriter::new(file), Compression::default()));

        writer.i32(FORMAT_VERSION)?;
        writer.i32(0)?;
        write_version(&mut writer, file_version)?;
        writer.u8(1)?;
        write_version(&mut writer, target_version)?;

        writer.into_inner().finish()?.flush()?;
        Ok(())
    }

    fn write_body<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        writer.count(self.types.len(), "type")?;
        for info in &self.types {
            info.write(writer)?;
        }

        writer.count(self.functions.len(), "function")?;
        for info in &self.functions {
            info.write(writer)?;
        }

        writer.count(self.globals.len(), "global")?;
        for info in &self.globals {
            info.write(writer)?;
        }

        writer.count(self.registrations.len(), "registration")?;
        for registration in &self.registrations {
            registration.write(writer)?;
        }

        writer.count(self.instances.len(), "type instance list")?;
        for (&list_id, entries) in &self.instances {
            write_instance_list_header(writer, list_id, entries.len())?;
            for entry in entries {
                entry.write(writer)?;
            }
        }

        write_cached_values(writer, &self.cached_values)
    }
}

fn read_body<R: Read>(reader: &mut Reader<R>, builder: &mut DatabaseBuilder) -> Result<()>
{
    for _ in 0..reader.count("type")? {
        builder.add_type(TypeInfo::read(reader)?)?;
    }
    for _ in 0..reader.count("function")? {
        builder.add_function(FunctionInfo::read(reader)?)?;
    }
    for _ in 0..reader.count("global")? {
        builder.add_global(GlobalInfo::read(reader)?)?;
    }
    for _ in 0..reader.count("registration")? {
        builder.add_registration(TypeRegistration::read(reader)?);
    }

    for _ in 0..reader.count("type instance list")? {
        let flags = reader.u8()?;
        let count = if flags & 0x01 != 0 {
            reader.count("type instance")?
        } else {
            usize::from(reader.u8()?)
        };
        let list_id = if flags & 0x02 != 0 {
            u32::from(reader.u16()?)
        } else if flags & 0x04 != 0 {
            u32::from(reader.u8()?)
        } else {
            reader.u32()?
        };

        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            entries.push(TypeInstanceInfo::read(reader, |vid| builder.has_type(vid))?);
        }
        builder.add_type_instances(list_id, entries);
    }

    builder.cached_values(read_cached_values(reader)?);
    Ok(())
}

fn write_instance_list_header<W: Write>(writer: &mut Writer<W>, list_id: u32, count: usize) -> Result<()>
{
    let narrow_count = u8::try_from(count).ok();
    let mut flags = 0u8;
    if narrow_count.is_none() {
        flags |= 0x01;
    }
    if list_id <= u32::from(u8::MAX) {
        flags |= 0x04;
    } else if list_id <= u32::from(u16::MAX) {
        flags |= 0x02;
    }

    writer.u8(flags)?;
    match narrow_count {
        Some(count) => writer.u8(count)?,
        None => writer.count(count, "type instance")?,
    }
    if flags & 0x02 != 0 {
        writer.u16(list_id as u16)
    } else if flags & 0x04 != 0 {
        writer.u8(list_id as u8)
    } else {
        writer.u32(list_id)
    }
}

/// Runs: `n > 0` is followed by `n` values, `n <= 0` stands for `-n` holes.
fn read_cached_values<R: Read>(reader: &mut Reader<R>) -> Result<Vec<Option<i32>>>
{
    let total = reader.count("cached value")?;
    let mut values = Vec::with_capacity(total.min(4096));
    while values.len() < total {
        let run = reader.i32()?;
        let len = usize::try_from(run.unsigned_abs())
            .map_err(|_| VidlibError::CorruptDatabase(format!("cached value run {run}")))?;
        if len == 0 || values.len() + len > total {
            return Err(VidlibError::CorruptDatabase(format!(
                "cached value run of {run} at index {} (total {total})",
                values.len()
            )));
        }
        if run > 0 {
            for _ in 0..len {
                values.push(Some(reader.i32()?));
            }
        } else {
            values.resize(values.len() + len, None);
        }
    }
    Ok(values)
}

fn write_cached_values<W: Write>(writer: &mut Writer<W>, values: &[Option<i32>]) -> Result<()>
{
    writer.count(values.len(), "cached value")?;
    let mut rest = values;
    while let Some(first) = rest.first() {
        let present = first.is_some();
        let len = rest.iter().take_while(|value| value.is_some() == present).count();
        let run = i32::try_from(len)
            .map_err(|_| VidlibError::InvalidArgument(format!("cached value run of {len} is too long")))?;

        if present {
            writer.i32(run)?;
            for value in rest[..len].iter().flatten() {
                writer.i32(*value)?;
            }
        } else {
            writer.i32(-run)?;
        }
        rest = &rest[len..];
    }
    Ok(())
}
