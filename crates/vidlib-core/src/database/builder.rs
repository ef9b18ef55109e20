//! In-memory construction of a [`SymbolDatabase`].

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::records::{FunctionInfo, GlobalInfo, TypeInfo, TypeInstanceInfo, TypeRegistration};
use super::{LoadOptions, SymbolDatabase, FORMAT_VERSION};
use crate::error::{Result, VidlibError};
use crate::types::FileVersion;

/// Collects records and checks uniqueness as they are added.
///
/// A rejected record leaves the builder unchanged.
///
/// ```
/// use vidlib_core::database::{FunctionInfo, LoadOptions, SymbolDatabase};
/// use vidlib_core::types::{Address, FileVersion};
///
/// let mut builder = SymbolDatabase::builder();
/// builder.file_version(FileVersion::new(1, 5, 97, 0)).library_version(12);
/// builder.add_function(FunctionInfo {
///     vid: 1,
///     begin: 0x1000,
///     end: 0x1020,
///     short_name: Some("Main".into()),
///     full_name: None,
/// })?;
/// let db = builder.build(LoadOptions::new(Address::from(0x1_4000_0000)))?;
/// assert_eq!(db.function(1).unwrap().display_name(false), "Main");
/// # Ok::<(), vidlib_core::error::VidlibError>(())
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseBuilder
{
    format_version: i32,
    library_version: i32,
    file_version: FileVersion,
    library_base_offset: u64,
    hash: u64,

    types: Vec<TypeInfo>,
    functions: Vec<FunctionInfo>,
    globals: Vec<GlobalInfo>,
    registrations: Vec<TypeRegistration>,
    instances: BTreeMap<u32, Vec<TypeInstanceInfo>>,
    cached_values: Vec<Option<i32>>,

    vid_address: BTreeMap<u64, u64>,
    vid_type: HashMap<u64, usize>,
    vtable_type: HashMap<u64, usize>,
}

impl Default for DatabaseBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl DatabaseBuilder
{
    /// Empty builder.
    pub fn new() -> Self
    {
        Self {
            format_version: FORMAT_VERSION,
            library_version: 0,
            file_version: FileVersion::default(),
            library_base_offset: 0,
            hash: 0,
            types: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            registrations: Vec::new(),
            instances: BTreeMap::new(),
            cached_values: Vec::new(),
            vid_address: BTreeMap::new(),
            vid_type: HashMap::new(),
            vtable_type: HashMap::new(),
        }
    }

    pub(crate) fn format_version(&mut self, format_version: i32) -> &mut Self
    {
        self.format_version = format_version;
        self
    }

    /// Set the library version.
    pub fn library_version(&mut self, library_version: i32) -> &mut Self
    {
        self.library_version = library_version;
        self
    }

    /// Set the product version the data describes.
    pub fn file_version(&mut self, file_version: FileVersion) -> &mut Self
    {
        self.file_version = file_version;
        self
    }

    /// Set the preferred base address of the binary.
    pub fn library_base_offset(&mut self, offset: u64) -> &mut Self
    {
        self.library_base_offset = offset;
        self
    }

    /// Set the content hash.
    pub fn hash(&mut self, hash: u64) -> &mut Self
    {
        self.hash = hash;
        self
    }

    /// Whether a type with this VID was added.
    pub fn has_type(&self, vid: u64) -> bool
    {
        vid != 0 && self.vid_type.contains_key(&vid)
    }

    /// Add a type.
    ///
    /// ## Errors
    ///
    /// - `DuplicateVid`: another type has the same non-zero VID
    /// - `DuplicateVtable`: another type has the same non-zero vtable
    pub fn add_type(&mut self, info: TypeInfo) -> Result<&mut Self>
    {
        if info.vid != 0 && self.vid_type.contains_key(&info.vid) {
            return Err(VidlibError::DuplicateVid {
                namespace: "type",
                vid: info.vid,
            });
        }
        if info.vtable != 0 && self.vtable_type.contains_key(&info.vtable) {
            return Err(VidlibError::DuplicateVtable(info.vtable));
        }

        let index = self.types.len();
        if info.vid != 0 {
            self.vid_type.insert(info.vid, index);
        }
        if info.vtable != 0 {
            self.vtable_type.insert(info.vtable, index);
        }
        self.types.push(info);
        Ok(self)
    }

    fn claim_address_vid(&mut self, vid: u64, offset: u64) -> Result<()>
    {
        if vid == 0 {
            return Ok(());
        }
        if self.vid_address.contains_key(&vid) {
            return Err(VidlibError::DuplicateVid {
                namespace: "function/global",
                vid,
            });
        }
        self.vid_address.insert(vid, offset);
        Ok(())
    }

    /// Add a function.
    ///
    /// ## Errors
    ///
    /// `DuplicateVid` if a function or global already uses the VID.
    pub fn add_function(&mut self, info: FunctionInfo) -> Result<&mut Self>
    {
        self.claim_address_vid(info.vid, info.begin)?;
        self.functions.push(info);
        Ok(self)
    }

    /// Add a global.
    ///
    /// ## Errors
    ///
    /// `DuplicateVid` if a function or global already uses the VID.
    pub fn add_global(&mut self, info: GlobalInfo) -> Result<&mut Self>
    {
        self.claim_address_vid(info.vid, info.begin)?;
        self.globals.push(info);
        Ok(self)
    }

    /// Add a (contract id, concrete id) registration pair.
    pub fn add_registration(&mut self, registration: TypeRegistration) -> &mut Self
    {
        self.registrations.push(registration);
        self
    }

    /// Set the entries of a type instance list, replacing any previous list.
    ///
    /// List id 0 is ignored. References to types that were not added are
    /// dropped.
    pub fn add_type_instances(&mut self, list_id: u32, mut entries: Vec<TypeInstanceInfo>) -> &mut Self
    {
        if list_id == 0 {
            return self;
        }
        for entry in &mut entries {
            entry.type_vid = entry.type_vid.filter(|vid| self.has_type(*vid));
        }
        self.instances.insert(list_id, entries);
        self
    }

    /// Set the optional cached integers.
    pub fn cached_values(&mut self, values: Vec<Option<i32>>) -> &mut Self
    {
        self.cached_values = values;
        self
    }

    /// Sort, index and freeze the database.
    ///
    /// ## Errors
    ///
    /// `CorruptDatabase` if a function ends before it begins or two functions overlap.
    pub fn build(mut self, options: LoadOptions) -> Result<SymbolDatabase>
    {
        if let Some(func) = self.functions.iter().find(|func| func.end < func.begin) {
            return Err(VidlibError::CorruptDatabase(format!(
                "function at 0x{:X} ends before it begins (0x{:X})",
                func.begin, func.end
            )));
        }
        self.functions.sort_by_key(|func| func.begin);
        if let Some(pair) = self.functions.windows(2).find(|pair| pair[0].end > pair[1].begin) {
            return Err(VidlibError::CorruptDatabase(format!(
                "functions at 0x{:X} and 0x{:X} overlap",
                pair[0].begin, pair[1].begin
            )));
        }

        let vid_function = self
            .functions
            .iter()
            .enumerate()
            .filter(|(_, func)| func.vid != 0)
            .map(|(index, func)| (func.vid, index))
            .collect();
        let vid_global = self
            .globals
            .iter()
            .enumerate()
            .filter(|(_, global)| global.vid != 0)
            .map(|(index, global)| (global.vid, index))
            .collect();

        debug!(
            types = self.types.len(),
            functions = self.functions.len(),
            globals = self.globals.len(),
            registrations = self.registrations.len(),
            "Built symbol database"
        );

        Ok(SymbolDatabase {
            format_version: self.format_version,
            library_version: self.library_version,
            file_version: self.file_version,
            requested_version: None,
            library_base_offset: self.library_base_offset,
            hash: self.hash,
            module_base: options.pointer_width.normalize(options.module_base),
            pointer_width: options.pointer_width,
            types: self.types,
            functions: self.functions,
            globals: self.globals,
            registrations: self.registrations,
            instances: self.instances,
            cached_values: self.cached_values,
            vid_address: self.vid_address,
            vid_function,
            vid_global,
            vid_type: self.vid_type,
            vtable_type: self.vtable_type,
        })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::Address;

    fn global(vid: u64, begin: u64) -> GlobalInfo
    {
        GlobalInfo {
            vid,
            begin,
            short_name: None,
            type_name: None,
        }
    }

    fn type_info(vid: u64, vtable: u64) -> TypeInfo
    {
        TypeInfo {
            vid,
            vtable,
            name: format!("class T{vid}"),
            size: None,
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_functions_and_globals_share_namespace()
    {
        let mut builder = DatabaseBuilder::new();
        builder.add_global(global(5, 0x10)).unwrap();
        let err = builder
            .add_function(FunctionInfo {
                vid: 5,
                begin: 0x20,
                end: 0x30,
                short_name: None,
                full_name: None,
            })
            .unwrap_err();
        assert!(matches!(err, VidlibError::DuplicateVid { vid: 5, .. }));

        let db = builder.build(LoadOptions::default()).unwrap();
        assert!(db.functions().is_empty());
        assert_eq!(db.offset_of(5), Some(0x10));
    }

    #[test]
    fn test_zero_vids_may_repeat()
    {
        let mut builder = DatabaseBuilder::new();
        builder.add_global(global(0, 0x10)).unwrap();
        builder.add_global(global(0, 0x20)).unwrap();
        builder.add_type(type_info(0, 0)).unwrap();
        builder.add_type(type_info(0, 0)).unwrap();

        let db = builder.build(LoadOptions::default()).unwrap();
        assert_eq!(db.globals().len(), 2);
        assert_eq!(db.types().len(), 2);
    }

    #[test]
    fn test_duplicate_types_are_rejected()
    {
        let mut builder = DatabaseBuilder::new();
        builder.add_type(type_info(1, 0x100)).unwrap();

        assert!(matches!(
            builder.add_type(type_info(1, 0x200)),
            Err(VidlibError::DuplicateVid { namespace: "type", vid: 1 })
        ));
        assert!(matches!(builder.add_type(type_info(2, 0x100)), Err(VidlibError::DuplicateVtable(0x100))));
        assert!(!builder.has_type(2));

        let db = builder.build(LoadOptions::default()).unwrap();
        assert_eq!(db.types().len(), 1);
    }

    #[test]
    fn test_overlapping_functions_are_rejected()
    {
        let func = |begin, end| FunctionInfo {
            vid: 0,
            begin,
            end,
            short_name: None,
            full_name: None,
        };
        let mut builder = DatabaseBuilder::new();
        builder.add_function(func(0x10, 0x30)).unwrap();
        builder.add_function(func(0x20, 0x40)).unwrap();
        assert!(builder.build(LoadOptions::default()).unwrap_err().is_format_error());
    }

    #[test]
    fn test_inverted_function_range_is_rejected()
    {
        let func = |begin, end| FunctionInfo {
            vid: 0,
            begin,
            end,
            short_name: None,
            full_name: None,
        };
        let mut builder = DatabaseBuilder::new();
        builder.add_function(func(0x10, 0x90)).unwrap();
        builder.add_function(func(0x100, 0x50)).unwrap();
        builder.add_function(func(0x200, 0x300)).unwrap();
        let err = builder.build(LoadOptions::default()).unwrap_err();
        assert!(matches!(err, VidlibError::CorruptDatabase(_)));

        let mut builder = DatabaseBuilder::new();
        builder.add_function(func(0x10, 0x90)).unwrap();
        builder.add_function(func(0x100, 0x100)).unwrap();
        builder.add_function(func(0x200, 0x300)).unwrap();
        let db = builder.build(LoadOptions::default()).unwrap();
        assert_eq!(db.function_at(Address::new(0x60), false).map(|f| f.begin), Some(0x10));
        assert_eq!(db.function_at(Address::new(0x250), false).map(|f| f.begin), Some(0x200));
        assert!(db.function_at(Address::new(0x100), false).is_none());
    }

    #[test]
    fn test_instances_drop_unknown_types()
    {
        let mut builder = DatabaseBuilder::new();
        builder.add_type(type_info(9, 0)).unwrap();
        builder.add_type_instances(
            3,
            vec![
                TypeInstanceInfo {
                    begin: Some(0),
                    end: Some(8),
                    type_vid: Some(9),
                },
                TypeInstanceInfo {
                    begin: None,
                    end: None,
                    type_vid: Some(10),
                },
            ],
        );
        builder.add_type_instances(0, Vec::new());

        let db = builder.build(LoadOptions::default()).unwrap();
        let list = db.type_instances(3);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].type_vid, Some(9));
        assert_eq!(list[1].type_vid, None);
        assert_eq!(db.type_instance_list_ids().collect::<Vec<_>>(), vec![3]);
    }
}
