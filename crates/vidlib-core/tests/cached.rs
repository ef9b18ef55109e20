//! Tests for cached accessors

use std::sync::Arc;

use vidlib_core::database::FunctionInfo;
use vidlib_core::prelude::*;

const MODULE_BASE: Address = Address::new(0x40_0000);

static TICK: CachedVid = CachedVid::new(0x100).with_signature("48 8B ?? C3");
static TICK_WRONG_SIGNATURE: CachedVid = CachedVid::new(0x100).with_signature("90 90");
static TICK_BODY: CachedVid = CachedVid::new(0x100).with_offset(4).with_pattern_offset(-4).with_signature("48 8B");

fn context() -> Context
{
    let mut builder = SymbolDatabase::builder();
    builder
        .add_function(FunctionInfo {
            vid: 0x100,
            begin: 0x1000,
            end: 0x1010,
            short_name: Some("Tick".to_string()),
            full_name: None,
        })
        .unwrap();
    builder.cached_values(vec![None, Some(64)]);
    let database = builder.build(LoadOptions::new(MODULE_BASE)).unwrap();

    let mut memory = MemorySnapshot::new(PointerWidth::Bits64);
    memory.insert(MODULE_BASE + 0x1000, vec![0x48, 0x8B, 0x05, 0xC3]);
    ContextBuilder::with_database(Arc::new(memory), database)
        .build()
        .unwrap()
}

#[test]
fn test_signature_is_verified_once()
{
    let context = context();
    assert_eq!(TICK.value(&context).unwrap(), MODULE_BASE + 0x1000);
    assert_eq!(TICK_BODY.value(&context).unwrap(), MODULE_BASE + 0x1004);
    assert!(TICK_WRONG_SIGNATURE.try_value(&context).is_none());
    assert!(matches!(TICK_WRONG_SIGNATURE.value(&context), Err(VidlibError::Unresolved(_))));
}

#[test]
fn test_concurrent_access_is_idempotent()
{
    static SHARED: CachedVid = CachedVid::new(0x100);

    let context = Arc::new(context());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let context = Arc::clone(&context);
            std::thread::spawn(move || (0..100).map(|_| SHARED.try_value(&context)).collect::<Vec<_>>())
        })
        .collect();

    for handle in handles {
        let values = handle.join().unwrap();
        assert!(values.iter().all(|value| *value == Some(MODULE_BASE + 0x1000)));
    }
    assert!(SHARED.is_resolved());
}

#[test]
fn test_failures_are_cached()
{
    static MISSING: CachedVid = CachedVid::new(0xDEAD);

    let without_database = ContextBuilder::new(Arc::new(MemorySnapshot::new(PointerWidth::Bits64)), MODULE_BASE)
        .build()
        .unwrap();
    assert!(MISSING.try_value(&without_database).is_none());
    // a later context does not retry
    assert!(MISSING.try_value(&context()).is_none());
}

#[test]
fn test_lib_values()
{
    let context = context();
    assert_eq!(LibValue::new(1).value(&context).unwrap(), 64);
    assert!(LibValue::new(0).value_safe(&context).is_none());
    assert!(matches!(LibValue::new(0).value(&context), Err(VidlibError::MissingCachedValue(0))));
}
