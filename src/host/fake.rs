//! In-process stand-in for the engine, used by unit tests
//!
//! Variants are `[tag, a, b]` with the tag equal to the type id. Strings,
//! arrays and dictionaries are shared through an `Arc` whose raw pointer is
//! the native value, so copies bump a count and keep the same bits. String
//! names are interned ids. The class database, objects, callables and script
//! instances record what they are given and call back through the function
//! pointers they were handed, like the engine does.

use super::abi::*;
use super::api::Resolver;
use crate::config::BridgeConfig;
use crate::managed::{install_managed, Managed};
use crate::registry::{MethodDef, PropertyDef};
use crate::runtime::{self, Bridge};
use crate::trampoline::VirtualId;
use crate::variant::Variant;
use core::ffi::{c_char, c_void};
use core::ptr::{self, NonNull};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::alloc::{alloc, dealloc, Layout};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Library token the shared test bridge is loaded with
pub const LIBRARY: usize = 0x5eed;

type Words = [u64; 3];

const NIL: u64 = VariantType::Nil as u64;
const BOOL: u64 = VariantType::Bool as u64;
const INT: u64 = VariantType::Int as u64;
const FLOAT: u64 = VariantType::Float as u64;
const STRING: u64 = VariantType::String as u64;
const VECTOR2: u64 = VariantType::Vector2 as u64;
const VECTOR3: u64 = VariantType::Vector3 as u64;
const COLOR: u64 = VariantType::Color as u64;
const STRING_NAME: u64 = VariantType::StringName as u64;
const CALLABLE: u64 = VariantType::Callable as u64;
const DICTIONARY: u64 = VariantType::Dictionary as u64;
const ARRAY: u64 = VariantType::Array as u64;

const EQUAL: u32 = Operator::Equal as u32;
const NOT_EQUAL: u32 = Operator::NotEqual as u32;
const LESS: u32 = Operator::Less as u32;
const ADD: u32 = Operator::Add as u32;
const SUBTRACT: u32 = Operator::Subtract as u32;
const MULTIPLY: u32 = Operator::Multiply as u32;

// ============================================================================
// Resolver
// ============================================================================

/// Resolves host function names to the fakes below
#[derive(Clone, Copy, Default)]
pub struct FakeHost;

macro_rules! fake_table {
    ($name:expr; $($function:ident),* $(,)?) => {
        match $name {
            $( stringify!($function) => $function as *mut c_void, )*
            _ => return None,
        }
    };
}

impl Resolver for FakeHost {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let function = fake_table!(name;
            variant_new_copy, variant_new_nil, variant_destroy, variant_call, variant_call_static,
            variant_evaluate, variant_set_keyed, variant_set_indexed, variant_get_keyed,
            variant_get_indexed, variant_set_named, variant_get_named, variant_has_key,
            variant_iter_init, variant_iter_next, variant_iter_get, variant_hash,
            variant_recursive_hash, variant_hash_compare, variant_booleanize, variant_duplicate,
            variant_stringify, variant_get_type, variant_has_method, variant_can_convert,
            variant_can_convert_strict, get_variant_from_type_constructor,
            get_variant_to_type_constructor, variant_get_ptr_destructor,
            variant_get_ptr_internal_getter, variant_get_ptr_indexed_setter,
            variant_get_ptr_indexed_getter, variant_get_ptr_keyed_setter,
            variant_get_ptr_keyed_getter, variant_get_ptr_operator_evaluator,
            variant_get_ptr_builtin_method, variant_get_ptr_constructor,
            variant_get_ptr_utility_function, string_name_new_with_utf8_chars_and_len,
            string_new_with_utf8_chars_and_len, mem_alloc, mem_free,
            classdb_construct_object2, classdb_get_method_bind, object_destroy,
            object_set_instance, object_get_instance_binding, object_set_instance_binding,
            object_free_instance_binding, object_get_instance_id, object_get_instance_from_id,
            object_method_bind_call, object_method_bind_ptrcall, object_get_script_instance,
            classdb_register_extension_class4, classdb_register_extension_class_method,
            classdb_register_extension_class_integer_constant,
            classdb_register_extension_class_property,
            classdb_register_extension_class_property_indexed,
            classdb_register_extension_class_property_group,
            classdb_register_extension_class_property_subgroup,
            classdb_register_extension_class_signal,
            classdb_register_extension_class_virtual_method, classdb_unregister_extension_class,
            callable_custom_create2, callable_custom_get_userdata, script_instance_create3,
            placeholder_script_instance_create, placeholder_script_instance_update,
            worker_thread_pool_add_native_task, worker_thread_pool_add_native_group_task,
        );
        NonNull::new(function)
    }
}

/// `get_proc_address` over [`FakeHost`]
pub unsafe extern "C" fn get_proc_address(name: *const c_char) -> Option<unsafe extern "C" fn()> {
    let name = CStr::from_ptr(name).to_str().ok()?;
    let function = FakeHost.resolve(name)?;
    Some(core::mem::transmute::<*mut c_void, unsafe extern "C" fn()>(function.as_ptr()))
}

// ============================================================================
// Shared test fixtures
// ============================================================================

/// The managed side installed for every test
pub fn recorder() -> &'static Recorder {
    static RECORDER: OnceCell<&'static Recorder> = OnceCell::new();
    RECORDER.get_or_init(|| {
        let recorder: &'static Recorder = Box::leak(Box::default());
        install_managed(recorder).expect("managed side installed twice");
        recorder
    })
}

/// The process-wide bridge, loaded from the fake host
pub fn bridge() -> &'static Bridge {
    static BRIDGE: OnceCell<&'static Bridge> = OnceCell::new();
    BRIDGE.get_or_init(|| {
        recorder();
        let bridge = Bridge::load(&FakeHost, LIBRARY as ClassLibraryPtr, BridgeConfig::default())
            .expect("fake host resolves every required function");
        runtime::install(bridge).expect("bridge installed twice")
    })
}

/// A standalone bridge over the fake host
pub fn local_bridge(config: BridgeConfig) -> Bridge {
    Bridge::load(&FakeHost, LIBRARY as ClassLibraryPtr, config).expect("fake host resolves every required function")
}

// ============================================================================
// Variant model
// ============================================================================

pub struct FakeArray(Mutex<Vec<Words>>);

impl Drop for FakeArray {
    fn drop(&mut self) {
        for words in self.0.get_mut().drain(..) {
            release(words);
        }
    }
}

pub struct FakeDict(Mutex<Vec<(Words, Words)>>);

impl Drop for FakeDict {
    fn drop(&mut self) {
        for (key, value) in self.0.get_mut().drain(..) {
            release(key);
            release(value);
        }
    }
}

unsafe fn read(ptr: *const c_void) -> Words {
    ptr.cast::<Words>().read_unaligned()
}

unsafe fn write(ptr: *mut c_void, words: Words) {
    ptr.cast::<Words>().write_unaligned(words)
}

fn pack(x: f32, y: f32) -> u64 {
    x.to_bits() as u64 | (y.to_bits() as u64) << 32
}

fn unpack(bits: u64) -> [f32; 2] {
    [f32::from_bits(bits as u32), f32::from_bits((bits >> 32) as u32)]
}

fn new_string(text: String) -> u64 {
    Arc::into_raw(Arc::new(text)) as u64
}

fn new_array(items: Vec<Words>) -> u64 {
    Arc::into_raw(Arc::new(FakeArray(Mutex::new(items)))) as u64
}

fn new_dict(entries: Vec<(Words, Words)>) -> u64 {
    Arc::into_raw(Arc::new(FakeDict(Mutex::new(entries)))) as u64
}

unsafe fn string_ref<'a>(raw: u64) -> &'a String {
    &*(raw as *const String)
}

unsafe fn array_ref<'a>(raw: u64) -> &'a FakeArray {
    &*(raw as *const FakeArray)
}

unsafe fn dict_ref<'a>(raw: u64) -> &'a FakeDict {
    &*(raw as *const FakeDict)
}

/// A new reference to the same value
fn share(words: Words) -> Words {
    // SAFETY: shared payloads are live `Arc`s for as long as `words` is
    unsafe {
        match words[0] {
            STRING => Arc::increment_strong_count(words[1] as *const String),
            ARRAY => Arc::increment_strong_count(words[1] as *const FakeArray),
            DICTIONARY => Arc::increment_strong_count(words[1] as *const FakeDict),
            _ => {}
        }
    }
    words
}

fn release(words: Words) {
    // SAFETY: each reference is released once
    unsafe {
        match words[0] {
            STRING => drop(Arc::from_raw(words[1] as *const String)),
            ARRAY => drop(Arc::from_raw(words[1] as *const FakeArray)),
            DICTIONARY => drop(Arc::from_raw(words[1] as *const FakeDict)),
            _ => {}
        }
    }
}

fn default_words(tag: u64) -> Words {
    match tag {
        STRING => [STRING, new_string(String::new()), 0],
        ARRAY => [ARRAY, new_array(Vec::new()), 0],
        DICTIONARY => [DICTIONARY, new_dict(Vec::new()), 0],
        _ => [tag, 0, 0],
    }
}

fn equal(a: Words, b: Words) -> bool {
    match (a[0], b[0]) {
        (INT, FLOAT) => a[1] as i64 as f64 == f64::from_bits(b[1]),
        (FLOAT, INT) => f64::from_bits(a[1]) == b[1] as i64 as f64,
        (FLOAT, FLOAT) => f64::from_bits(a[1]) == f64::from_bits(b[1]),
        // SAFETY: both payloads are live
        (STRING, STRING) => unsafe { string_ref(a[1]) == string_ref(b[1]) },
        (ARRAY, ARRAY) if a[1] == b[1] => true,
        (ARRAY, ARRAY) => {
            let (x, y) = unsafe { (array_ref(a[1]).0.lock().clone(), array_ref(b[1]).0.lock().clone()) };
            x.len() == y.len() && x.iter().zip(&y).all(|(l, r)| equal(*l, *r))
        }
        (l, r) => l == r && a == b,
    }
}

fn fnv(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ *b as u64).wrapping_mul(0x100_0000_01b3)) as i64
}

fn hash_words(words: Words, depth: Option<i64>) -> i64 {
    match words[0] {
        // SAFETY: payload is live
        STRING => fnv(unsafe { string_ref(words[1]) }.as_bytes()),
        ARRAY if depth == Some(0) => 0,
        ARRAY => {
            let items = unsafe { array_ref(words[1]).0.lock().clone() };
            items.iter().fold(items.len() as i64, |h, item| {
                h.wrapping_mul(31).wrapping_add(hash_words(*item, depth.map(|d| d - 1)))
            })
        }
        _ => (words[0] << 56 ^ words[1] ^ words[2].rotate_left(17)) as i64,
    }
}

fn text_of(words: Words) -> String {
    match words[0] {
        NIL => "<null>".to_string(),
        BOOL => (words[1] != 0).to_string(),
        INT => (words[1] as i64).to_string(),
        FLOAT => f64::from_bits(words[1]).to_string(),
        // SAFETY: payload is live
        STRING => unsafe { string_ref(words[1]).clone() },
        VECTOR2 => {
            let [x, y] = unpack(words[1]);
            format!("({x}, {y})")
        }
        STRING_NAME => name_text(words[1]),
        ARRAY => {
            let items = unsafe { array_ref(words[1]).0.lock().clone() };
            let parts: Vec<String> = items.into_iter().map(text_of).collect();
            format!("[{}]", parts.join(", "))
        }
        tag => format!("<{tag}>"),
    }
}

fn truthy(words: Words) -> bool {
    match words[0] {
        NIL => false,
        BOOL | INT => words[1] != 0,
        FLOAT => f64::from_bits(words[1]) != 0.0,
        STRING => !unsafe { string_ref(words[1]) }.is_empty(),
        ARRAY => !unsafe { array_ref(words[1]) }.0.lock().is_empty(),
        _ => true,
    }
}

fn deep_copy(words: Words) -> Words {
    match words[0] {
        ARRAY => {
            let items = unsafe { array_ref(words[1]).0.lock().clone() };
            [ARRAY, new_array(items.into_iter().map(deep_copy).collect()), 0]
        }
        _ => share(words),
    }
}

// -- test-facing constructors and readers -----------------------------------

pub fn nil() -> Variant {
    // SAFETY: nil owns nothing
    unsafe { Variant::from_words([NIL, 0, 0]) }
}

pub fn int(value: i64) -> Variant {
    unsafe { Variant::from_words([INT, value as u64, 0]) }
}

pub fn float(value: f64) -> Variant {
    unsafe { Variant::from_words([FLOAT, value.to_bits(), 0]) }
}

pub fn boolean(value: bool) -> Variant {
    unsafe { Variant::from_words([BOOL, value as u64, 0]) }
}

pub fn vector2(x: f32, y: f32) -> Variant {
    unsafe { Variant::from_words([VECTOR2, pack(x, y), 0]) }
}

pub fn string(text: &str) -> Variant {
    unsafe { Variant::from_words([STRING, new_string(text.to_string()), 0]) }
}

/// Array taking ownership of `items`
pub fn array(items: Vec<Variant>) -> Variant {
    let items = items.into_iter().map(Variant::into_words).collect();
    unsafe { Variant::from_words([ARRAY, new_array(items), 0]) }
}

pub fn dictionary(entries: Vec<(Variant, Variant)>) -> Variant {
    let entries = entries.into_iter().map(|(k, v)| (k.into_words(), v.into_words())).collect();
    unsafe { Variant::from_words([DICTIONARY, new_dict(entries), 0]) }
}

fn words_of(value: &Variant) -> Words {
    // SAFETY: `value` is live
    unsafe { read(value.as_ptr()) }
}

pub fn as_int(value: &Variant) -> Option<i64> {
    let words = words_of(value);
    (words[0] == INT).then(|| words[1] as i64)
}

pub fn as_float(value: &Variant) -> Option<f64> {
    let words = words_of(value);
    (words[0] == FLOAT).then(|| f64::from_bits(words[1]))
}

pub fn as_bool(value: &Variant) -> Option<bool> {
    let words = words_of(value);
    (words[0] == BOOL).then(|| words[1] != 0)
}

pub fn as_string(value: &Variant) -> Option<String> {
    let words = words_of(value);
    (words[0] == STRING).then(|| unsafe { string_ref(words[1]).clone() })
}

/// Strong count of the payload behind a shared variant
pub fn share_count(value: &Variant) -> usize {
    let words = words_of(value);
    // SAFETY: payload is live; the temporary reference is not released
    unsafe {
        match words[0] {
            STRING => {
                let arc = core::mem::ManuallyDrop::new(Arc::from_raw(words[1] as *const String));
                Arc::strong_count(&arc)
            }
            ARRAY => {
                let arc = core::mem::ManuallyDrop::new(Arc::from_raw(words[1] as *const FakeArray));
                Arc::strong_count(&arc)
            }
            _ => 0,
        }
    }
}

/// Text of a native String written by the bridge or the host
///
/// # Safety
/// `native` must hold a live native String.
pub unsafe fn native_string(native: *const c_void) -> String {
    string_ref(native.cast::<u64>().read()).clone()
}

/// Write a native String into host storage
///
/// # Safety
/// `out` must be writable storage for one native String.
pub unsafe fn write_native_string(out: *mut c_void, text: &str) {
    out.cast::<u64>().write(new_string(text.to_string()));
}

// ============================================================================
// String names
// ============================================================================

static NAMES: Lazy<Mutex<Vec<String>>> = Lazy::new(Default::default);

pub fn intern(text: &str) -> u64 {
    let mut names = NAMES.lock();
    if let Some(index) = names.iter().position(|name| name == text) {
        return index as u64 + 1;
    }
    names.push(text.to_string());
    names.len() as u64
}

pub fn name_text(id: u64) -> String {
    NAMES.lock().get((id as usize).wrapping_sub(1)).cloned().unwrap_or_default()
}

/// # Safety
/// `ptr` must be null or point to a StringName.
pub unsafe fn name_at(ptr: *const c_void) -> String {
    if ptr.is_null() {
        return String::new();
    }
    name_text(ptr.cast::<u64>().read())
}

/// # Safety
/// `ptr` must be null or point to a native String.
pub unsafe fn string_at(ptr: *const c_void) -> String {
    if ptr.is_null() {
        return String::new();
    }
    native_string(ptr)
}

unsafe extern "C" fn string_name_new_with_utf8_chars_and_len(r_dest: StringNamePtr, chars: *const c_char, len: Int) {
    let bytes = core::slice::from_raw_parts(chars.cast::<u8>(), len as usize);
    r_dest.cast::<u64>().write(intern(&String::from_utf8_lossy(bytes)));
}

unsafe extern "C" fn string_new_with_utf8_chars_and_len(r_dest: StringPtr, chars: *const c_char, len: Int) {
    let bytes = core::slice::from_raw_parts(chars.cast::<u8>(), len as usize);
    r_dest.cast::<u64>().write(new_string(String::from_utf8_lossy(bytes).into_owned()));
}

// ============================================================================
// Core variant functions
// ============================================================================

unsafe extern "C" fn variant_new_copy(r_dest: VariantPtr, src: ConstVariantPtr) {
    write(r_dest, share(read(src)));
}

unsafe extern "C" fn variant_new_nil(r_dest: VariantPtr) {
    write(r_dest, [NIL, 0, 0]);
}

unsafe extern "C" fn variant_destroy(value: VariantPtr) {
    release(read(value));
    write(value, [NIL, 0, 0]);
}

fn expect_args(args: &[Words], count: usize) -> Result<(), CallError> {
    if args.len() > count {
        Err(CallError::with(CallErrorType::TooManyArguments, 0, count as i32))
    } else if args.len() < count {
        Err(CallError::with(CallErrorType::TooFewArguments, 0, count as i32))
    } else {
        Ok(())
    }
}

unsafe fn collect_args(args: *const ConstVariantPtr, count: Int) -> Vec<Words> {
    (0..count.max(0) as usize).map(|i| read(*args.add(i))).collect()
}

unsafe fn finish(r_return: VariantPtr, r_error: *mut CallError, outcome: Result<Words, CallError>) {
    match outcome {
        Ok(words) => {
            write(r_return, words);
            *r_error = CallError::ok();
        }
        Err(error) => {
            write(r_return, [NIL, 0, 0]);
            *r_error = error;
        }
    }
}

unsafe extern "C" fn variant_call(
    this: VariantPtr,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
) {
    let target = read(this);
    let args = collect_args(args, argument_count);
    let outcome = match (target[0], name_at(method).as_str()) {
        (ARRAY, "size") => expect_args(&args, 0).map(|_| [INT, array_ref(target[1]).0.lock().len() as u64, 0]),
        (ARRAY, "append") => expect_args(&args, 1).map(|_| {
            array_ref(target[1]).0.lock().push(share(args[0]));
            [NIL, 0, 0]
        }),
        (STRING, "length") => expect_args(&args, 0).map(|_| [INT, string_ref(target[1]).chars().count() as u64, 0]),
        _ => Err(CallError::with(CallErrorType::InvalidMethod, 0, 0)),
    };
    finish(r_return, r_error, outcome);
}

unsafe extern "C" fn variant_call_static(
    ty: RawVariantType,
    method: ConstStringNamePtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
) {
    let args = collect_args(args, argument_count);
    let outcome = match (ty as u64, name_at(method).as_str()) {
        (INT, "max") => expect_args(&args, 2).and_then(|_| {
            match args.iter().position(|a| a[0] != INT) {
                Some(bad) => Err(CallError::with(CallErrorType::InvalidArgument, bad as i32, INT as i32)),
                None => Ok([INT, (args[0][1] as i64).max(args[1][1] as i64) as u64, 0]),
            }
        }),
        _ => Err(CallError::with(CallErrorType::InvalidMethod, 0, 0)),
    };
    finish(r_return, r_error, outcome);
}

fn as_number(words: Words) -> Option<f64> {
    match words[0] {
        INT => Some(words[1] as i64 as f64),
        FLOAT => Some(f64::from_bits(words[1])),
        _ => None,
    }
}

fn evaluate(op: u32, a: Words, b: Words) -> Option<Words> {
    let truth = |value: bool| [BOOL, value as u64, 0];
    match (a[0], b[0]) {
        (INT, INT) => {
            let (x, y) = (a[1] as i64, b[1] as i64);
            match op {
                EQUAL => Some(truth(x == y)),
                NOT_EQUAL => Some(truth(x != y)),
                LESS => Some(truth(x < y)),
                ADD => Some([INT, x.wrapping_add(y) as u64, 0]),
                SUBTRACT => Some([INT, x.wrapping_sub(y) as u64, 0]),
                MULTIPLY => Some([INT, x.wrapping_mul(y) as u64, 0]),
                _ => None,
            }
        }
        (INT | FLOAT, INT | FLOAT) => {
            let (x, y) = (as_number(a)?, as_number(b)?);
            match op {
                EQUAL => Some(truth(x == y)),
                NOT_EQUAL => Some(truth(x != y)),
                LESS => Some(truth(x < y)),
                ADD => Some([FLOAT, (x + y).to_bits(), 0]),
                SUBTRACT => Some([FLOAT, (x - y).to_bits(), 0]),
                MULTIPLY => Some([FLOAT, (x * y).to_bits(), 0]),
                _ => None,
            }
        }
        (STRING, STRING) if op == ADD => {
            // SAFETY: payloads are live
            let joined = unsafe { format!("{}{}", string_ref(a[1]), string_ref(b[1])) };
            Some([STRING, new_string(joined), 0])
        }
        _ => match op {
            EQUAL => Some(truth(equal(a, b))),
            NOT_EQUAL => Some(truth(!equal(a, b))),
            _ => None,
        },
    }
}

unsafe extern "C" fn variant_evaluate(
    op: RawOperator,
    a: ConstVariantPtr,
    b: ConstVariantPtr,
    r_result: VariantPtr,
    r_valid: *mut Bool,
) {
    match evaluate(op, read(a), read(b)) {
        Some(words) => {
            write(r_result, words);
            *r_valid = 1;
        }
        None => {
            write(r_result, [NIL, 0, 0]);
            *r_valid = 0;
        }
    }
}

fn normalize(index: Int, len: usize) -> Option<usize> {
    let index = if index < 0 { index + len as Int } else { index };
    (0..len as Int).contains(&index).then_some(index as usize)
}

unsafe extern "C" fn variant_get_indexed(
    this: ConstVariantPtr,
    index: Int,
    r_ret: VariantPtr,
    r_valid: *mut Bool,
    r_oob: *mut Bool,
) {
    let target = read(this);
    let (value, valid, oob) = match target[0] {
        ARRAY => {
            let items = array_ref(target[1]).0.lock();
            match normalize(index, items.len()) {
                Some(i) => (share(items[i]), 1, 0),
                None => ([NIL, 0, 0], 0, 1),
            }
        }
        VECTOR2 => match normalize(index, 2) {
            Some(i) => ([FLOAT, (unpack(target[1])[i] as f64).to_bits(), 0], 1, 0),
            None => ([NIL, 0, 0], 0, 1),
        },
        _ => ([NIL, 0, 0], 0, 0),
    };
    write(r_ret, value);
    *r_valid = valid;
    *r_oob = oob;
}

unsafe extern "C" fn variant_set_indexed(
    this: VariantPtr,
    index: Int,
    value: ConstVariantPtr,
    r_valid: *mut Bool,
    r_oob: *mut Bool,
) {
    let target = read(this);
    let (valid, oob) = match target[0] {
        ARRAY => {
            let mut items = array_ref(target[1]).0.lock();
            match normalize(index, items.len()) {
                Some(i) => {
                    let old = core::mem::replace(&mut items[i], share(read(value)));
                    drop(items);
                    release(old);
                    (1, 0)
                }
                None => (0, 1),
            }
        }
        _ => (0, 0),
    };
    *r_valid = valid;
    *r_oob = oob;
}

fn dict_find(entries: &[(Words, Words)], key: Words) -> Option<usize> {
    entries.iter().position(|(k, _)| equal(*k, key))
}

unsafe extern "C" fn variant_get_keyed(this: ConstVariantPtr, key: ConstVariantPtr, r_ret: VariantPtr, r_valid: *mut Bool) {
    let target = read(this);
    let found = match target[0] {
        DICTIONARY => {
            let entries = dict_ref(target[1]).0.lock();
            dict_find(&entries, read(key)).map(|i| share(entries[i].1))
        }
        _ => None,
    };
    write(r_ret, found.unwrap_or([NIL, 0, 0]));
    *r_valid = found.is_some() as Bool;
}

unsafe extern "C" fn variant_set_keyed(this: VariantPtr, key: ConstVariantPtr, value: ConstVariantPtr, r_valid: *mut Bool) {
    let target = read(this);
    if target[0] != DICTIONARY {
        *r_valid = 0;
        return;
    }
    let (key, value) = (read(key), share(read(value)));
    let mut entries = dict_ref(target[1]).0.lock();
    let old = match dict_find(&entries, key) {
        Some(i) => Some(core::mem::replace(&mut entries[i].1, value)),
        None => {
            entries.push((share(key), value));
            None
        }
    };
    drop(entries);
    if let Some(old) = old {
        release(old);
    }
    *r_valid = 1;
}

unsafe extern "C" fn variant_has_key(this: ConstVariantPtr, key: ConstVariantPtr, r_valid: *mut Bool) -> Bool {
    let target = read(this);
    if target[0] != DICTIONARY {
        *r_valid = 0;
        return 0;
    }
    *r_valid = 1;
    dict_find(&dict_ref(target[1]).0.lock(), read(key)).is_some() as Bool
}

unsafe extern "C" fn variant_get_named(this: ConstVariantPtr, name: ConstStringNamePtr, r_ret: VariantPtr, r_valid: *mut Bool) {
    let target = read(this);
    let component = match (target[0], name_at(name).as_str()) {
        (VECTOR2, "x") => Some(0),
        (VECTOR2, "y") => Some(1),
        _ => None,
    };
    match component {
        Some(i) => {
            write(r_ret, [FLOAT, (unpack(target[1])[i] as f64).to_bits(), 0]);
            *r_valid = 1;
        }
        None => {
            write(r_ret, [NIL, 0, 0]);
            *r_valid = 0;
        }
    }
}

unsafe extern "C" fn variant_set_named(this: VariantPtr, name: ConstStringNamePtr, value: ConstVariantPtr, r_valid: *mut Bool) {
    let target = read(this);
    let component = match (target[0], name_at(name).as_str()) {
        (VECTOR2, "x") => Some(0),
        (VECTOR2, "y") => Some(1),
        _ => None,
    };
    match (component, as_number(read(value))) {
        (Some(i), Some(number)) => {
            let mut xy = unpack(target[1]);
            xy[i] = number as f32;
            write(this, [VECTOR2, pack(xy[0], xy[1]), 0]);
            *r_valid = 1;
        }
        _ => *r_valid = 0,
    }
}

unsafe extern "C" fn variant_iter_init(this: ConstVariantPtr, r_iter: VariantPtr, r_valid: *mut Bool) -> Bool {
    let target = read(this);
    write(r_iter, [INT, 0, 0]);
    let len = match target[0] {
        ARRAY => array_ref(target[1]).0.lock().len() as i64,
        INT => target[1] as i64,
        _ => {
            *r_valid = 0;
            return 0;
        }
    };
    *r_valid = 1;
    (len > 0) as Bool
}

unsafe extern "C" fn variant_iter_next(this: ConstVariantPtr, r_iter: VariantPtr, r_valid: *mut Bool) -> Bool {
    let target = read(this);
    let position = read(r_iter);
    let len = match (target[0], position[0]) {
        (ARRAY, INT) => array_ref(target[1]).0.lock().len() as i64,
        (INT, INT) => target[1] as i64,
        _ => {
            *r_valid = 0;
            return 0;
        }
    };
    *r_valid = 1;
    let next = position[1] as i64 + 1;
    write(r_iter, [INT, next as u64, 0]);
    (next < len) as Bool
}

unsafe extern "C" fn variant_iter_get(this: ConstVariantPtr, r_iter: VariantPtr, r_ret: VariantPtr, r_valid: *mut Bool) {
    let target = read(this);
    let position = read(r_iter)[1] as i64;
    let value = match target[0] {
        ARRAY => {
            let items = array_ref(target[1]).0.lock();
            normalize(position, items.len()).filter(|_| position >= 0).map(|i| share(items[i]))
        }
        INT => (position < target[1] as i64).then_some([INT, position as u64, 0]),
        _ => None,
    };
    write(r_ret, value.unwrap_or([NIL, 0, 0]));
    *r_valid = value.is_some() as Bool;
}

unsafe extern "C" fn variant_hash(this: ConstVariantPtr) -> Int {
    hash_words(read(this), None)
}

unsafe extern "C" fn variant_recursive_hash(this: ConstVariantPtr, depth: Int) -> Int {
    hash_words(read(this), Some(depth))
}

unsafe extern "C" fn variant_hash_compare(a: ConstVariantPtr, b: ConstVariantPtr) -> Bool {
    equal(read(a), read(b)) as Bool
}

unsafe extern "C" fn variant_booleanize(this: ConstVariantPtr) -> Bool {
    truthy(read(this)) as Bool
}

unsafe extern "C" fn variant_duplicate(this: ConstVariantPtr, r_ret: VariantPtr, deep: Bool) {
    let source = read(this);
    let copy = match source[0] {
        ARRAY if deep != 0 => deep_copy(source),
        ARRAY => {
            let items = array_ref(source[1]).0.lock().clone();
            [ARRAY, new_array(items.into_iter().map(share).collect()), 0]
        }
        _ => share(source),
    };
    write(r_ret, copy);
}

unsafe extern "C" fn variant_stringify(this: ConstVariantPtr, r_ret: StringPtr) {
    r_ret.cast::<u64>().write(new_string(text_of(read(this))));
}

unsafe extern "C" fn variant_get_type(this: ConstVariantPtr) -> RawVariantType {
    read(this)[0] as RawVariantType
}

unsafe extern "C" fn variant_has_method(this: ConstVariantPtr, method: ConstStringNamePtr) -> Bool {
    matches!(
        (read(this)[0], name_at(method).as_str()),
        (ARRAY, "size" | "append") | (STRING, "length")
    ) as Bool
}

fn numeric(tag: u64) -> bool {
    matches!(tag, BOOL | INT | FLOAT)
}

unsafe extern "C" fn variant_can_convert(from: RawVariantType, to: RawVariantType) -> Bool {
    let (from, to) = (from as u64, to as u64);
    (from == to || (numeric(from) && numeric(to)) || to == STRING) as Bool
}

unsafe extern "C" fn variant_can_convert_strict(from: RawVariantType, to: RawVariantType) -> Bool {
    let (from, to) = (from as u64, to as u64);
    (from == to || matches!((from, to), (INT, FLOAT) | (FLOAT, INT))) as Bool
}

// ============================================================================
// Per-type functions
// ============================================================================

unsafe extern "C" fn from_type<const T: u64>(r_variant: VariantPtr, native: TypePtr) {
    let words = match T {
        BOOL => [T, (native.cast::<u8>().read() != 0) as u64, 0],
        INT | FLOAT | STRING_NAME => [T, native.cast::<u64>().read_unaligned(), 0],
        VECTOR2 => {
            let [x, y] = native.cast::<[f32; 2]>().read_unaligned();
            [T, pack(x, y), 0]
        }
        VECTOR3 => {
            let [x, y, z] = native.cast::<[f32; 3]>().read_unaligned();
            [T, pack(x, y), z.to_bits() as u64]
        }
        COLOR => {
            let [r, g, b, a] = native.cast::<[f32; 4]>().read_unaligned();
            [T, pack(r, g), pack(b, a)]
        }
        CALLABLE => {
            let [a, b] = native.cast::<[u64; 2]>().read_unaligned();
            [T, a, b]
        }
        STRING | ARRAY | DICTIONARY => share([T, native.cast::<u64>().read_unaligned(), 0]),
        _ => [NIL, 0, 0],
    };
    write(r_variant, words);
}

unsafe extern "C" fn to_type<const T: u64>(r_native: TypePtr, variant: VariantPtr) {
    let source = read(variant);
    let words = if source[0] == T { share(source) } else { default_words(T) };
    match T {
        BOOL => r_native.cast::<u8>().write(words[1] as u8),
        INT | FLOAT | STRING_NAME | STRING | ARRAY | DICTIONARY => r_native.cast::<u64>().write_unaligned(words[1]),
        VECTOR2 => r_native.cast::<[f32; 2]>().write_unaligned(unpack(words[1])),
        VECTOR3 => {
            let [x, y] = unpack(words[1]);
            r_native.cast::<[f32; 3]>().write_unaligned([x, y, f32::from_bits(words[2] as u32)]);
        }
        COLOR => {
            let ([r, g], [b, a]) = (unpack(words[1]), unpack(words[2]));
            r_native.cast::<[f32; 4]>().write_unaligned([r, g, b, a]);
        }
        CALLABLE => r_native.cast::<[u64; 2]>().write_unaligned([words[1], words[2]]),
        _ => {}
    }
}

unsafe extern "C" fn destroy_native<const T: u64>(base: TypePtr) {
    release([T, base.cast::<u64>().read_unaligned(), 0]);
}

unsafe extern "C" fn internal_ptr<const T: u64>(variant: VariantPtr) -> *mut c_void {
    variant.cast::<u64>().add(1).cast()
}

macro_rules! per_type {
    ($ty:expr, $function:ident, [$($tag:ident),* $(,)?]) => {
        match $ty as u64 {
            $( $tag => Some($function::<$tag> as _), )*
            _ => None,
        }
    };
}

unsafe extern "C" fn get_variant_from_type_constructor(ty: RawVariantType) -> Option<VariantFromTypeConstructor> {
    per_type!(ty, from_type, [BOOL, INT, FLOAT, STRING, VECTOR2, VECTOR3, COLOR, STRING_NAME, CALLABLE, DICTIONARY, ARRAY])
}

unsafe extern "C" fn get_variant_to_type_constructor(ty: RawVariantType) -> Option<TypeFromVariantConstructor> {
    per_type!(ty, to_type, [BOOL, INT, FLOAT, STRING, VECTOR2, VECTOR3, COLOR, STRING_NAME, CALLABLE, DICTIONARY, ARRAY])
}

unsafe extern "C" fn variant_get_ptr_destructor(ty: RawVariantType) -> Option<PtrDestructor> {
    per_type!(ty, destroy_native, [STRING, STRING_NAME, DICTIONARY, ARRAY])
}

unsafe extern "C" fn variant_get_ptr_internal_getter(ty: RawVariantType) -> Option<VariantGetInternalPtr> {
    per_type!(ty, internal_ptr, [BOOL, INT, FLOAT, VECTOR2])
}

unsafe extern "C" fn array_get(base: ConstTypePtr, index: Int, r_value: TypePtr) {
    let items = array_ref(base.cast::<u64>().read()).0.lock();
    let value = normalize(index, items.len()).map_or([NIL, 0, 0], |i| share(items[i]));
    write(r_value, value);
}

unsafe extern "C" fn array_set(base: TypePtr, index: Int, value: ConstTypePtr) {
    let mut items = array_ref(base.cast::<u64>().read()).0.lock();
    if let Some(i) = normalize(index, items.len()) {
        let old = core::mem::replace(&mut items[i], share(read(value)));
        drop(items);
        release(old);
    }
}

unsafe extern "C" fn dict_get(base: ConstTypePtr, key: ConstTypePtr, r_value: TypePtr) {
    let entries = dict_ref(base.cast::<u64>().read()).0.lock();
    let value = dict_find(&entries, read(key)).map_or([NIL, 0, 0], |i| share(entries[i].1));
    write(r_value, value);
}

unsafe extern "C" fn dict_set(base: TypePtr, key: ConstTypePtr, value: ConstTypePtr) {
    let mut variant = [DICTIONARY, base.cast::<u64>().read(), 0];
    let mut valid = 0;
    variant_set_keyed(variant.as_mut_ptr().cast(), key, value, &mut valid);
}

unsafe extern "C" fn variant_get_ptr_indexed_getter(ty: RawVariantType) -> Option<PtrIndexedGetter> {
    (ty as u64 == ARRAY).then_some(array_get as PtrIndexedGetter)
}

unsafe extern "C" fn variant_get_ptr_indexed_setter(ty: RawVariantType) -> Option<PtrIndexedSetter> {
    (ty as u64 == ARRAY).then_some(array_set as PtrIndexedSetter)
}

unsafe extern "C" fn variant_get_ptr_keyed_getter(ty: RawVariantType) -> Option<PtrKeyedGetter> {
    (ty as u64 == DICTIONARY).then_some(dict_get as PtrKeyedGetter)
}

unsafe extern "C" fn variant_get_ptr_keyed_setter(ty: RawVariantType) -> Option<PtrKeyedSetter> {
    (ty as u64 == DICTIONARY).then_some(dict_set as PtrKeyedSetter)
}

// ============================================================================
// Ptrcall functions
// ============================================================================

unsafe extern "C" fn int_add(left: ConstTypePtr, right: ConstTypePtr, r_result: TypePtr) {
    let sum = left.cast::<i64>().read_unaligned().wrapping_add(right.cast::<i64>().read_unaligned());
    r_result.cast::<i64>().write_unaligned(sum);
}

unsafe extern "C" fn int_equal(left: ConstTypePtr, right: ConstTypePtr, r_result: TypePtr) {
    let same = left.cast::<i64>().read_unaligned() == right.cast::<i64>().read_unaligned();
    r_result.cast::<u8>().write(same as u8);
}

unsafe extern "C" fn float_multiply(left: ConstTypePtr, right: ConstTypePtr, r_result: TypePtr) {
    let product = left.cast::<f64>().read_unaligned() * right.cast::<f64>().read_unaligned();
    r_result.cast::<f64>().write_unaligned(product);
}

unsafe extern "C" fn variant_get_ptr_operator_evaluator(
    op: RawOperator,
    left: RawVariantType,
    right: RawVariantType,
) -> Option<PtrOperatorEvaluator> {
    match (op, left as u64, right as u64) {
        (ADD, INT, INT) => Some(int_add),
        (EQUAL, INT, INT) => Some(int_equal),
        (MULTIPLY, FLOAT, FLOAT) => Some(float_multiply),
        _ => None,
    }
}

thread_local! {
    static RECORDED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Argument addresses seen by the last `record` builtin on this thread
pub fn recorded_arguments() -> Vec<usize> {
    RECORDED.with(|recorded| recorded.borrow().clone())
}

unsafe extern "C" fn builtin_record(_base: TypePtr, args: *const ConstTypePtr, r_return: TypePtr, argument_count: i32) {
    let addresses = (0..argument_count.max(0) as usize).map(|i| *args.add(i) as usize).collect();
    RECORDED.with(|recorded| *recorded.borrow_mut() = addresses);
    if !r_return.is_null() {
        r_return.cast::<i64>().write_unaligned(argument_count as i64);
    }
}

unsafe extern "C" fn vector2_dot(base: TypePtr, args: *const ConstTypePtr, r_return: TypePtr, _argument_count: i32) {
    let [x, y] = base.cast::<[f32; 2]>().read_unaligned();
    let [u, v] = (*args).cast::<[f32; 2]>().read_unaligned();
    r_return.cast::<f64>().write_unaligned((x * u + y * v) as f64);
}

unsafe extern "C" fn variant_get_ptr_builtin_method(
    ty: RawVariantType,
    method: ConstStringNamePtr,
    _hash: Int,
) -> Option<PtrBuiltInMethod> {
    match (ty as u64, name_at(method).as_str()) {
        (_, "record") => Some(builtin_record),
        (VECTOR2, "dot") => Some(vector2_dot),
        _ => None,
    }
}

unsafe extern "C" fn vector2_zero(base: TypePtr, _args: *const ConstTypePtr) {
    base.cast::<[f32; 2]>().write_unaligned([0.0, 0.0]);
}

unsafe extern "C" fn vector2_from_floats(base: TypePtr, args: *const ConstTypePtr) {
    let x = (*args).cast::<f64>().read_unaligned();
    let y = (*args.add(1)).cast::<f64>().read_unaligned();
    base.cast::<[f32; 2]>().write_unaligned([x as f32, y as f32]);
}

unsafe extern "C" fn variant_get_ptr_constructor(ty: RawVariantType, index: i32) -> Option<PtrConstructor> {
    match (ty as u64, index) {
        (VECTOR2, 0) => Some(vector2_zero),
        (VECTOR2, 3) => Some(vector2_from_floats),
        _ => None,
    }
}

unsafe extern "C" fn utility_maxi(r_return: TypePtr, args: *const ConstTypePtr, argument_count: i32) {
    let max = (0..argument_count.max(0) as usize)
        .map(|i| (*args.add(i)).cast::<i64>().read_unaligned())
        .max()
        .unwrap_or(0);
    r_return.cast::<i64>().write_unaligned(max);
}

unsafe extern "C" fn variant_get_ptr_utility_function(name: ConstStringNamePtr, _hash: Int) -> Option<PtrUtilityFunction> {
    (name_at(name) == "maxi").then_some(utility_maxi as PtrUtilityFunction)
}

// ============================================================================
// Memory
// ============================================================================

const HEADER: usize = 16;

unsafe extern "C" fn mem_alloc(size: usize) -> *mut c_void {
    let layout = Layout::from_size_align(size + HEADER, HEADER).expect("allocation size overflow");
    let base = alloc(layout);
    if base.is_null() {
        return ptr::null_mut();
    }
    base.cast::<usize>().write(size);
    base.add(HEADER).cast()
}

unsafe extern "C" fn mem_free(memory: *mut c_void) {
    if memory.is_null() {
        return;
    }
    let base = memory.cast::<u8>().sub(HEADER);
    let size = base.cast::<usize>().read();
    dealloc(base, Layout::from_size_align_unchecked(size + HEADER, HEADER));
}

// ============================================================================
// Class database
// ============================================================================

pub struct FakeMethod {
    pub name: String,
    pub info: ClassMethodInfo,
    pub arguments: Vec<String>,
}

pub struct FakeVirtualMethod {
    pub name: String,
    pub flags: u32,
    pub return_type: RawVariantType,
    pub arguments: Vec<String>,
}

pub struct FakeProperty {
    pub name: String,
    pub ty: RawVariantType,
    pub setter: String,
    pub getter: String,
    pub index: Option<Int>,
}

pub struct FakeClass {
    pub name: String,
    pub parent: String,
    pub info: ClassCreationInfo4,
    pub icon: String,
    pub methods: Vec<FakeMethod>,
    pub virtual_methods: Vec<FakeVirtualMethod>,
    pub constants: Vec<(String, String, Int, bool)>,
    pub properties: Vec<FakeProperty>,
    pub groups: Vec<(String, String)>,
    pub signals: Vec<(String, Vec<String>)>,
    pub unregistered: bool,
}

// SAFETY: the raw pointers are only compared or read by tests
unsafe impl Send for FakeClass {}

static CLASSES: Lazy<Mutex<Vec<FakeClass>>> = Lazy::new(Default::default);

/// Inspect the latest registration of `name`
pub fn with_class<R>(name: &str, inspect: impl FnOnce(&FakeClass) -> R) -> Option<R> {
    let classes = CLASSES.lock();
    classes.iter().rev().find(|class| class.name == name).map(inspect)
}

fn with_class_mut(name: &str, update: impl FnOnce(&mut FakeClass)) {
    let mut classes = CLASSES.lock();
    if let Some(class) = classes.iter_mut().rev().find(|class| class.name == name) {
        update(class);
    }
}

unsafe fn info_names(infos: *const PropertyInfo, count: usize) -> Vec<String> {
    (0..count).map(|i| name_at((*infos.add(i)).name)).collect()
}

unsafe extern "C" fn classdb_register_extension_class4(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    parent_class_name: ConstStringNamePtr,
    info: *const ClassCreationInfo4,
) {
    CLASSES.lock().push(FakeClass {
        name: name_at(class_name),
        parent: name_at(parent_class_name),
        info: *info,
        icon: string_at((*info).icon_path),
        methods: Vec::new(),
        virtual_methods: Vec::new(),
        constants: Vec::new(),
        properties: Vec::new(),
        groups: Vec::new(),
        signals: Vec::new(),
        unregistered: false,
    });
}

unsafe extern "C" fn classdb_register_extension_class_method(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const ClassMethodInfo,
) {
    let info = *info;
    let method = FakeMethod {
        name: name_at(info.name),
        arguments: info_names(info.arguments_info, info.argument_count as usize),
        info,
    };
    with_class_mut(&name_at(class_name), |class| class.methods.push(method));
}

unsafe extern "C" fn classdb_register_extension_class_virtual_method(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const ClassVirtualMethodInfo,
) {
    let info = &*info;
    let method = FakeVirtualMethod {
        name: name_at(info.name),
        flags: info.method_flags,
        return_type: info.return_value.type_,
        arguments: if info.arguments.is_null() {
            Vec::new()
        } else {
            info_names(info.arguments, info.argument_count as usize)
        },
    };
    with_class_mut(&name_at(class_name), |class| class.virtual_methods.push(method));
}

unsafe extern "C" fn classdb_register_extension_class_integer_constant(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    enum_name: ConstStringNamePtr,
    constant_name: ConstStringNamePtr,
    value: Int,
    is_bitfield: Bool,
) {
    let constant = (name_at(enum_name), name_at(constant_name), value, is_bitfield != 0);
    with_class_mut(&name_at(class_name), |class| class.constants.push(constant));
}

unsafe fn record_property(
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
    setter: ConstStringNamePtr,
    getter: ConstStringNamePtr,
    index: Option<Int>,
) {
    let property = FakeProperty {
        name: name_at((*info).name),
        ty: (*info).type_,
        setter: name_at(setter),
        getter: name_at(getter),
        index,
    };
    with_class_mut(&name_at(class_name), |class| class.properties.push(property));
}

unsafe extern "C" fn classdb_register_extension_class_property(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
    setter: ConstStringNamePtr,
    getter: ConstStringNamePtr,
) {
    record_property(class_name, info, setter, getter, None);
}

unsafe extern "C" fn classdb_register_extension_class_property_indexed(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    info: *const PropertyInfo,
    setter: ConstStringNamePtr,
    getter: ConstStringNamePtr,
    index: Int,
) {
    record_property(class_name, info, setter, getter, Some(index));
}

unsafe extern "C" fn classdb_register_extension_class_property_group(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    group: ConstStringPtr,
    prefix: ConstStringPtr,
) {
    let group = (string_at(group), string_at(prefix));
    with_class_mut(&name_at(class_name), |class| class.groups.push(group));
}

unsafe extern "C" fn classdb_register_extension_class_property_subgroup(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    subgroup: ConstStringPtr,
    prefix: ConstStringPtr,
) {
    let subgroup = (format!("/{}", string_at(subgroup)), string_at(prefix));
    with_class_mut(&name_at(class_name), |class| class.groups.push(subgroup));
}

unsafe extern "C" fn classdb_register_extension_class_signal(
    _library: ClassLibraryPtr,
    class_name: ConstStringNamePtr,
    signal_name: ConstStringNamePtr,
    arguments: *const PropertyInfo,
    argument_count: Int,
) {
    let signal = (name_at(signal_name), info_names(arguments, argument_count.max(0) as usize));
    with_class_mut(&name_at(class_name), |class| class.signals.push(signal));
}

unsafe extern "C" fn classdb_unregister_extension_class(_library: ClassLibraryPtr, class_name: ConstStringNamePtr) {
    with_class_mut(&name_at(class_name), |class| class.unregistered = true);
}

unsafe extern "C" fn classdb_get_method_bind(
    class_name: ConstStringNamePtr,
    method_name: ConstStringNamePtr,
    _hash: Int,
) -> MethodBindPtr {
    let (class_name, method_name) = (name_at(class_name), name_at(method_name));
    let classes = CLASSES.lock();
    let found = classes.iter().enumerate().rev().find(|(_, class)| class.name == class_name).and_then(
        |(ci, class)| class.methods.iter().position(|m| m.name == method_name).map(|mi| (ci, mi)),
    );
    match found {
        Some((ci, mi)) => (((ci + 1) << 16) | (mi + 1)) as MethodBindPtr,
        None => ptr::null(),
    }
}

fn bound_method(bind: MethodBindPtr) -> Option<ClassMethodInfo> {
    let raw = bind as usize;
    let (ci, mi) = ((raw >> 16).checked_sub(1)?, (raw & 0xFFFF).checked_sub(1)?);
    CLASSES.lock().get(ci)?.methods.get(mi).map(|method| method.info)
}

// ============================================================================
// Objects
// ============================================================================

#[derive(Default)]
struct FakeObject {
    id: ObjectId,
    class: String,
    instance: usize,
    instance_class: String,
    bindings: Vec<(usize, usize, usize)>,
    script: usize,
}

static OBJECTS: Lazy<Mutex<HashMap<usize, FakeObject>>> = Lazy::new(Default::default);
static NEXT_OBJECT: AtomicU64 = AtomicU64::new(1);

/// Managed instance attached to `object`, 0 when none
pub fn instance_of(object: ObjectPtr) -> u64 {
    OBJECTS.lock().get(&(object as usize)).map_or(0, |o| o.instance as u64)
}

/// Native class `object` was constructed as
pub fn class_of(object: ObjectPtr) -> Option<String> {
    OBJECTS.lock().get(&(object as usize)).map(|o| o.class.clone())
}

/// Live objects constructed as `class`
pub fn objects_of(class: &str) -> usize {
    OBJECTS.lock().values().filter(|o| o.class == class).count()
}

pub fn object_exists(object: ObjectPtr) -> bool {
    OBJECTS.lock().contains_key(&(object as usize))
}

/// Bindings held on `object` as `(token, binding)`
pub fn bindings_of(object: ObjectPtr) -> Vec<(usize, usize)> {
    OBJECTS
        .lock()
        .get(&(object as usize))
        .map(|o| o.bindings.iter().map(|&(token, binding, _)| (token, binding)).collect())
        .unwrap_or_default()
}

pub fn attach_script(object: ObjectPtr, data: ScriptInstanceDataPtr) {
    if let Some(o) = OBJECTS.lock().get_mut(&(object as usize)) {
        o.script = data as usize;
    }
}

unsafe extern "C" fn classdb_construct_object2(class_name: ConstStringNamePtr) -> ObjectPtr {
    let id = NEXT_OBJECT.fetch_add(1, Ordering::Relaxed);
    let address = (id as usize) << 4;
    let object = FakeObject { id, class: name_at(class_name), ..FakeObject::default() };
    OBJECTS.lock().insert(address, object);
    address as ObjectPtr
}

unsafe extern "C" fn object_destroy(object: ObjectPtr) {
    let Some(removed) = OBJECTS.lock().remove(&(object as usize)) else {
        return;
    };
    if removed.instance != 0 {
        let info = with_class(&removed.instance_class, |class| class.info);
        if let Some(info) = info {
            if let Some(free) = info.free_instance_func {
                free(info.class_userdata, removed.instance as ClassInstancePtr);
            }
        }
    }
    for (token, binding, callbacks) in removed.bindings {
        let callbacks = &*(callbacks as *const InstanceBindingCallbacks);
        if let Some(free) = callbacks.free_callback {
            free(token as *mut c_void, object, binding as *mut c_void);
        }
    }
}

unsafe extern "C" fn object_set_instance(object: ObjectPtr, class_name: ConstStringNamePtr, instance: ClassInstancePtr) {
    let class_name = name_at(class_name);
    if let Some(o) = OBJECTS.lock().get_mut(&(object as usize)) {
        o.instance = instance as usize;
        o.instance_class = class_name;
    }
}

unsafe extern "C" fn object_set_instance_binding(
    object: ObjectPtr,
    token: *mut c_void,
    binding: *mut c_void,
    callbacks: *const InstanceBindingCallbacks,
) {
    if let Some(o) = OBJECTS.lock().get_mut(&(object as usize)) {
        o.bindings.retain(|&(t, _, _)| t != token as usize);
        o.bindings.push((token as usize, binding as usize, callbacks as usize));
    }
}

unsafe extern "C" fn object_get_instance_binding(
    object: ObjectPtr,
    token: *mut c_void,
    callbacks: *const InstanceBindingCallbacks,
) -> *mut c_void {
    let existing = OBJECTS.lock().get(&(object as usize)).and_then(|o| {
        o.bindings.iter().find(|&&(t, _, _)| t == token as usize).map(|&(_, binding, _)| binding)
    });
    if let Some(binding) = existing {
        return binding as *mut c_void;
    }
    let Some(create) = callbacks.as_ref().and_then(|c| c.create_callback) else {
        return ptr::null_mut();
    };
    let binding = create(token, object);
    object_set_instance_binding(object, token, binding, callbacks);
    binding
}

unsafe extern "C" fn object_free_instance_binding(object: ObjectPtr, token: *mut c_void) {
    if let Some(o) = OBJECTS.lock().get_mut(&(object as usize)) {
        o.bindings.retain(|&(t, _, _)| t != token as usize);
    }
}

unsafe extern "C" fn object_get_instance_id(object: ConstObjectPtr) -> ObjectId {
    OBJECTS.lock().get(&(object as usize)).map_or(0, |o| o.id)
}

unsafe extern "C" fn object_get_instance_from_id(id: ObjectId) -> ObjectPtr {
    let address = (id as usize) << 4;
    if OBJECTS.lock().contains_key(&address) {
        address as ObjectPtr
    } else {
        ptr::null_mut()
    }
}

unsafe extern "C" fn object_method_bind_call(
    bind: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstVariantPtr,
    argument_count: Int,
    r_return: VariantPtr,
    r_error: *mut CallError,
) {
    let instance = instance_of(object) as usize as ClassInstancePtr;
    match bound_method(bind).and_then(|info| info.call_func.map(|call| (info, call))) {
        Some((info, call)) => call(info.method_userdata, instance, args, argument_count, r_return, r_error),
        None => finish(r_return, r_error, Err(CallError::with(CallErrorType::InvalidMethod, 0, 0))),
    }
}

unsafe extern "C" fn object_method_bind_ptrcall(
    bind: MethodBindPtr,
    object: ObjectPtr,
    args: *const ConstTypePtr,
    r_ret: TypePtr,
) {
    let instance = instance_of(object) as usize as ClassInstancePtr;
    if let Some(info) = bound_method(bind) {
        if let Some(ptrcall) = info.ptrcall_func {
            ptrcall(info.method_userdata, instance, args, r_ret);
        }
    }
}

unsafe extern "C" fn object_get_script_instance(object: ConstObjectPtr, _language: ObjectPtr) -> ScriptInstanceDataPtr {
    OBJECTS.lock().get(&(object as usize)).map_or(ptr::null_mut(), |o| o.script as ScriptInstanceDataPtr)
}

// ============================================================================
// Callables and script instances
// ============================================================================

struct Recorded<T>(T);

// SAFETY: recorded host structs are only read back by tests
unsafe impl<T> Send for Recorded<T> {}

static CALLABLES: Lazy<Mutex<Vec<Recorded<CallableCustomInfo2>>>> = Lazy::new(Default::default);

/// Callbacks registered for a callable made by `callable_custom_create2`
pub fn callable_info(native: &[u64; 2]) -> Option<CallableCustomInfo2> {
    let index = (native[0] as usize).checked_sub(1)?;
    CALLABLES.lock().get(index).map(|recorded| recorded.0)
}

unsafe extern "C" fn callable_custom_create2(r_callable: TypePtr, info: *mut CallableCustomInfo2) {
    let mut callables = CALLABLES.lock();
    callables.push(Recorded(*info));
    r_callable.cast::<[u64; 2]>().write_unaligned([callables.len() as u64, 0]);
}

unsafe extern "C" fn callable_custom_get_userdata(callable: ConstTypePtr, token: *mut c_void) -> *mut c_void {
    let native = callable.cast::<[u64; 2]>().read_unaligned();
    match callable_info(&native) {
        Some(info) if info.token == token => info.callable_userdata,
        _ => ptr::null_mut(),
    }
}

static SCRIPTS: Lazy<Mutex<Vec<(usize, usize)>>> = Lazy::new(Default::default);
static PLACEHOLDERS: Lazy<Mutex<Vec<(usize, usize, usize)>>> = Lazy::new(Default::default);

/// Info table and data a script instance was created with
pub fn script_instance(instance: ScriptInstancePtr) -> Option<(&'static ScriptInstanceInfo3, ScriptInstanceDataPtr)> {
    let index = (instance as usize >> 4).checked_sub(1)?;
    let (info, data) = *SCRIPTS.lock().get(index)?;
    // SAFETY: the bridge only hands over its static info table
    Some((unsafe { &*(info as *const ScriptInstanceInfo3) }, data as ScriptInstanceDataPtr))
}

/// `(owner, property count, value count)` last pushed into a placeholder
pub fn placeholder_state(placeholder: ScriptInstancePtr) -> Option<(usize, usize, usize)> {
    let index = (placeholder as usize >> 4).checked_sub(1)?;
    PLACEHOLDERS.lock().get(index).copied()
}

unsafe extern "C" fn script_instance_create3(info: *const ScriptInstanceInfo3, data: ScriptInstanceDataPtr) -> ScriptInstancePtr {
    let mut scripts = SCRIPTS.lock();
    scripts.push((info as usize, data as usize));
    (scripts.len() << 4) as ScriptInstancePtr
}

unsafe extern "C" fn placeholder_script_instance_create(
    _language: ObjectPtr,
    _script: ObjectPtr,
    owner: ObjectPtr,
) -> ScriptInstancePtr {
    let mut placeholders = PLACEHOLDERS.lock();
    placeholders.push((owner as usize, 0, 0));
    (placeholders.len() << 4) as ScriptInstancePtr
}

unsafe extern "C" fn placeholder_script_instance_update(
    placeholder: ScriptInstancePtr,
    properties: ConstTypePtr,
    values: ConstTypePtr,
) {
    let properties = array_ref(properties.cast::<u64>().read()).0.lock().len();
    let values = dict_ref(values.cast::<u64>().read()).0.lock().len();
    let Some(index) = (placeholder as usize >> 4).checked_sub(1) else {
        return;
    };
    if let Some(entry) = PLACEHOLDERS.lock().get_mut(index) {
        entry.1 = properties;
        entry.2 = values;
    }
}

// ============================================================================
// Managed side
// ============================================================================

// ============================================================================
// Worker thread pool
// ============================================================================

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);
static QUEUED: Lazy<Mutex<HashMap<i64, (String, bool)>>> = Lazy::new(Default::default);

/// Description and priority a task was queued with
pub fn queued_task(id: i64) -> Option<(String, bool)> {
    QUEUED.lock().get(&id).cloned()
}

fn queue(description: ConstStringPtr, high_priority: Bool) -> i64 {
    let id = NEXT_TASK.fetch_add(1, Ordering::Relaxed) as i64;
    // SAFETY: the description is a live host String for the call
    let description = unsafe { string_at(description) };
    QUEUED.lock().insert(id, (description, high_priority != 0));
    id
}

/// Runs the task on a pool thread and waits for it
unsafe extern "C" fn worker_thread_pool_add_native_task(
    _pool: ObjectPtr,
    func: WorkerThreadPoolTask,
    userdata: *mut c_void,
    high_priority: Bool,
    description: ConstStringPtr,
) -> i64 {
    let id = queue(description, high_priority);
    let userdata = userdata as usize;
    std::thread::spawn(move || func(userdata as *mut c_void)).join().expect("task thread panicked");
    id
}

/// Spreads the elements over `tasks` threads (4 when negative) and waits for all of them
unsafe extern "C" fn worker_thread_pool_add_native_group_task(
    _pool: ObjectPtr,
    func: WorkerThreadPoolGroupTask,
    userdata: *mut c_void,
    elements: i32,
    tasks: i32,
    high_priority: Bool,
    description: ConstStringPtr,
) -> i64 {
    let id = queue(description, high_priority);
    let (userdata, elements) = (userdata as usize, elements.max(0) as u32);
    let workers = if tasks < 1 { 4 } else { tasks as u32 };
    std::thread::scope(|scope| {
        for worker in 0..workers {
            scope.spawn(move || {
                for index in (worker..elements).step_by(workers as usize) {
                    func(userdata as *mut c_void, index);
                }
            });
        }
    });
    id
}

/// Managed dispatcher that records what reaches it.
///
/// Tests share one instance, so assertions look for their own handles
/// instead of counting everything.
#[derive(Default)]
pub struct Recorder {
    next_instance: AtomicU64,
    virtuals: Mutex<Vec<(u8, u64, i64)>>,
    calls: Mutex<Vec<(u64, u64, usize)>>,
    freed: Mutex<Vec<(u64, u64)>>,
    bindings_freed: Mutex<Vec<(usize, u64)>>,
    levels: Mutex<Vec<(u32, bool)>>,
    notifications: Mutex<Vec<(u64, i32, bool)>>,
    references: Mutex<Vec<(u64, bool)>>,
    properties: Mutex<HashMap<(u64, u64), Words>>,
    callables_freed: Mutex<Vec<u64>>,
    scripts_freed: Mutex<Vec<u64>>,
    tasks: Mutex<Vec<(u64, Option<u32>)>>,
}

/// Method handle whose boxed call always fails with an argument error
pub const FAILING_METHOD: u64 = 13;

/// Managed class whose instances all get [`FIXED_INSTANCE`]
pub const FIXED_INSTANCE_CLASS: u64 = 14;
pub const FIXED_INSTANCE: u64 = 7;

impl Recorder {
    pub fn virtuals(&self) -> Vec<(u8, u64, i64)> {
        self.virtuals.lock().clone()
    }

    pub fn calls(&self) -> Vec<(u64, u64, usize)> {
        self.calls.lock().clone()
    }

    pub fn freed(&self) -> Vec<(u64, u64)> {
        self.freed.lock().clone()
    }

    pub fn bindings_freed(&self) -> Vec<(usize, u64)> {
        self.bindings_freed.lock().clone()
    }

    pub fn levels(&self) -> Vec<(u32, bool)> {
        self.levels.lock().clone()
    }

    pub fn notifications(&self) -> Vec<(u64, i32, bool)> {
        self.notifications.lock().clone()
    }

    pub fn references(&self) -> Vec<(u64, bool)> {
        self.references.lock().clone()
    }

    pub fn callables_freed(&self) -> Vec<u64> {
        self.callables_freed.lock().clone()
    }

    pub fn scripts_freed(&self) -> Vec<u64> {
        self.scripts_freed.lock().clone()
    }

    /// Task runs as `(task, group index)`
    pub fn tasks(&self) -> Vec<(u64, Option<u32>)> {
        self.tasks.lock().clone()
    }
}

impl Managed for &'static Recorder {
    fn initialize(&self, level: u32) {
        self.levels.lock().push((level, true));
    }

    fn deinitialize(&self, level: u32) {
        self.levels.lock().push((level, false));
    }

    fn create_instance(&self, class: u64, _object: ObjectPtr) -> u64 {
        if class == FIXED_INSTANCE_CLASS {
            return FIXED_INSTANCE;
        }
        1_000 + self.next_instance.fetch_add(1, Ordering::Relaxed)
    }

    fn free_instance(&self, class: u64, instance: u64) {
        self.freed.lock().push((class, instance));
    }

    fn call_virtual(&self, id: VirtualId, instance: u64, args: *const ConstTypePtr, ret: TypePtr) {
        // SAFETY: tests pass a frame whose first slot holds an i64
        let value = unsafe {
            if args.is_null() || (*args).is_null() {
                0
            } else {
                (*args).cast::<i64>().read_unaligned()
            }
        };
        self.virtuals.lock().push((id.get(), instance, value));
        if !ret.is_null() {
            unsafe { ret.cast::<i64>().write_unaligned(value * 2) };
        }
    }

    fn call(&self, method: u64, instance: u64, args: &[ConstVariantPtr], ret: VariantPtr) -> Result<(), CallError> {
        if method == FAILING_METHOD {
            return Err(CallError::with(CallErrorType::InvalidArgument, 1, INT as i32));
        }
        self.calls.lock().push((method, instance, args.len()));
        unsafe { write(ret, [INT, args.len() as u64, 0]) };
        Ok(())
    }

    fn ptrcall(&self, method: u64, instance: u64, args: *const ConstTypePtr, ret: TypePtr) {
        let value = unsafe { (*args).cast::<i64>().read_unaligned() };
        self.calls.lock().push((method, instance, 1));
        unsafe { ret.cast::<i64>().write_unaligned(value + 1) };
    }

    fn set_property(&self, instance: u64, name: ConstStringNamePtr, value: ConstVariantPtr) -> bool {
        let (key, value) = unsafe { ((instance, name.cast::<u64>().read()), share(read(value))) };
        if let Some(old) = self.properties.lock().insert(key, value) {
            release(old);
        }
        true
    }

    fn get_property(&self, instance: u64, name: ConstStringNamePtr, ret: VariantPtr) -> bool {
        let key = unsafe { (instance, name.cast::<u64>().read()) };
        match self.properties.lock().get(&key) {
            Some(&value) => {
                unsafe { write(ret, share(value)) };
                true
            }
            None => false,
        }
    }

    fn property_list(&self, _instance: u64) -> Vec<PropertyDef> {
        vec![
            PropertyDef::new("speed", VariantType::Float),
            PropertyDef::new("label", VariantType::String).with_hint(0, "name"),
        ]
    }

    fn property_can_revert(&self, _instance: u64, name: ConstStringNamePtr) -> bool {
        unsafe { name_at(name) == "speed" }
    }

    fn property_get_revert(&self, _instance: u64, name: ConstStringNamePtr, ret: VariantPtr) -> bool {
        if unsafe { name_at(name) } != "speed" {
            return false;
        }
        unsafe { write(ret, [FLOAT, 1.5f64.to_bits(), 0]) };
        true
    }

    fn validate_property(&self, _instance: u64, property: &mut PropertyInfo) -> bool {
        property.usage = 0;
        true
    }

    fn notification(&self, instance: u64, what: i32, reversed: bool) {
        self.notifications.lock().push((instance, what, reversed));
    }

    fn to_string(&self, instance: u64, out: StringPtr) -> bool {
        unsafe { write_native_string(out, &format!("Recorder({instance})")) };
        true
    }

    fn reference(&self, instance: u64, increment: bool) {
        self.references.lock().push((instance, increment));
    }

    fn binding_created(&self, object: ObjectPtr) -> u64 {
        object as u64 | 1
    }

    fn binding_freed(&self, object: ObjectPtr, binding: u64) {
        self.bindings_freed.lock().push((object as usize, binding));
    }

    fn script_owner(&self, script: u64) -> ObjectPtr {
        (script << 4) as usize as ObjectPtr
    }

    fn script_class_category(&self, _script: u64) -> Option<PropertyDef> {
        Some(PropertyDef::new("FakeScript", VariantType::Nil).with_usage(128))
    }

    fn script_property_state(&self, _script: u64, add: &mut dyn FnMut(ConstStringNamePtr, ConstVariantPtr)) {
        let name = intern("health");
        let value: Words = [INT, 100, 0];
        add((&name as *const u64).cast(), value.as_ptr().cast());
    }

    fn script_method_list(&self, _script: u64) -> Vec<MethodDef> {
        vec![
            MethodDef::new("run", 5)
                .with_return(PropertyDef::new("", VariantType::Int))
                .with_argument(PropertyDef::new("speed", VariantType::Float)),
            MethodDef::new("stop", 6),
        ]
    }

    fn script_property_type(&self, _script: u64, name: ConstStringNamePtr) -> Option<VariantType> {
        (unsafe { name_at(name) } == "health").then_some(VariantType::Int)
    }

    fn script_has_method(&self, _script: u64, name: ConstStringNamePtr) -> bool {
        unsafe { name_at(name) == "run" }
    }

    fn script_method_argument_count(&self, _script: u64, name: ConstStringNamePtr) -> Option<i64> {
        (unsafe { name_at(name) } == "run").then_some(1)
    }

    fn script_call(
        &self,
        _script: u64,
        method: ConstStringNamePtr,
        args: &[ConstVariantPtr],
        ret: VariantPtr,
    ) -> Result<(), CallError> {
        if unsafe { name_at(method) } != "run" {
            return Err(CallError::with(CallErrorType::InvalidMethod, 0, 0));
        }
        unsafe { write(ret, [INT, args.len() as u64, 0]) };
        Ok(())
    }

    fn script_free(&self, script: u64) {
        self.scripts_freed.lock().push(script);
    }

    fn callable_call(&self, _callable: u64, args: &[ConstVariantPtr], ret: VariantPtr) -> Result<(), CallError> {
        let mut sum = 0i64;
        for (index, &arg) in args.iter().enumerate() {
            let words = unsafe { read(arg) };
            if words[0] != INT {
                return Err(CallError::with(CallErrorType::InvalidArgument, index as i32, INT as i32));
            }
            sum += words[1] as i64;
        }
        unsafe { write(ret, [INT, sum as u64, 0]) };
        Ok(())
    }

    fn callable_free(&self, callable: u64) {
        self.callables_freed.lock().push(callable);
    }

    fn run_task(&self, task: u64) {
        self.tasks.lock().push((task, None));
    }

    fn run_group_task(&self, task: u64, index: u32) {
        self.tasks.lock().push((task, Some(index)));
    }

    fn callable_to_string(&self, callable: u64, out: StringPtr) -> bool {
        unsafe { write_native_string(out, &format!("Callable({callable})")) };
        true
    }

    fn callable_argument_count(&self, _callable: u64) -> Option<i64> {
        Some(2)
    }
}
