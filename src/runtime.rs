//! Bridge bootstrap and the library entry point
//!
//! Design: `Bridge` bundles everything resolved once at startup (host table,
//! type table, configuration) plus the registries that grow afterwards. The
//! process-wide instance is written once by `install`; host callbacks reach it
//! through `bridge()`. Components that only need variant operations take a
//! `VariantBridge` instead, so tests can inject fakes.

use crate::config::BridgeConfig;
use crate::error::{ffi_guard, BridgeError, Result};
use crate::host::abi::*;
use crate::host::{HostApi, ProcAddress, Resolver};
use crate::logging::{self, log_bridge_init, log_bridge_shutdown};
use crate::managed::managed;
use crate::registry::{ClassRegistry, Lifecycle};
use crate::type_table::TypeTable;
use crate::variant::VariantBridge;
use core::ffi::c_void;
use once_cell::sync::OnceCell;

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Resolved host state and live registrations
pub struct Bridge {
    api: HostApi,
    types: TypeTable,
    config: BridgeConfig,
    library: usize,
    registry: ClassRegistry,
    lifecycle: Lifecycle,
}

impl Bridge {
    /// Resolve the host table and populate the type table
    pub fn load(resolver: &dyn Resolver, library: ClassLibraryPtr, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let api = HostApi::load(resolver)?;
        let types = TypeTable::load(&api);
        Ok(Self {
            api,
            types,
            registry: ClassRegistry::new(config.virtual_slots),
            config,
            library: library as usize,
            lifecycle: Lifecycle::new(),
        })
    }

    #[inline]
    pub fn api(&self) -> &HostApi {
        &self.api
    }

    #[inline]
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Library token the host gave at startup
    #[inline]
    pub fn library(&self) -> ClassLibraryPtr {
        self.library as ClassLibraryPtr
    }

    #[inline]
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    #[inline]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    #[inline]
    pub fn variants(&self) -> VariantBridge<'_> {
        VariantBridge::new(&self.api, &self.types)
            .with_recursion_limit(self.config.hash_recursion_limit)
            .with_frame_slots(self.config.max_frame_slots)
    }
}

/// Make `bridge` the process-wide instance; only the first call succeeds
pub fn install(bridge: Bridge) -> Result<&'static Bridge> {
    BRIDGE.set(bridge).map_err(|_| BridgeError::AlreadyInitialized)?;
    bridge_ref()
}

fn bridge_ref() -> Result<&'static Bridge> {
    BRIDGE.get().ok_or(BridgeError::NotInitialized)
}

/// The installed bridge
#[inline]
pub fn bridge() -> Result<&'static Bridge> {
    bridge_ref()
}

/// Initialization record handed back to the host
pub fn initialization_record() -> Initialization {
    Initialization {
        minimum_initialization_level: initialization_level::CORE,
        userdata: core::ptr::null_mut(),
        initialize: Some(initialize_level),
        deinitialize: Some(deinitialize_level),
    }
}

unsafe extern "C" fn initialize_level(_userdata: *mut c_void, level: u32) {
    ffi_guard("initialize", (), || {
        log_bridge_init(level);
        match managed() {
            Ok(target) => target.initialize(level),
            Err(err) => tracing::warn!(target: "host", level, error = %err, "no managed side to initialize"),
        }
    })
}

unsafe extern "C" fn deinitialize_level(_userdata: *mut c_void, level: u32) {
    ffi_guard("deinitialize", (), || {
        log_bridge_shutdown(level);
        if let Ok(target) = managed() {
            target.deinitialize(level);
        }
    })
}

/// Load, install and describe the bridge
///
/// # Safety
/// `r_initialization` must be null or writable.
pub unsafe fn init_library(
    get_proc_address: Option<GetProcAddress>,
    library: ClassLibraryPtr,
    r_initialization: *mut Initialization,
) -> Result<&'static Bridge> {
    let get_proc_address = get_proc_address.ok_or(BridgeError::Unresolved { name: "get_proc_address" })?;
    let out = r_initialization.as_mut().ok_or(BridgeError::Config("null initialization record".into()))?;

    let config = BridgeConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(target: "host", error = %err, "falling back to default configuration");
        BridgeConfig::default()
    });
    logging::init_with_config(config.log_config());

    let bridge = install(Bridge::load(&ProcAddress(get_proc_address), library, config)?)?;
    *out = initialization_record();
    tracing::info!(
        target: "host",
        types = bridge.types().populated(),
        dispatch = ?bridge.config().virtual_dispatch,
        "bridge ready"
    );
    Ok(bridge)
}

/// Library entry point the host looks up by name.
///
/// Returns false when a required host function is missing or the bridge is
/// already running.
///
/// # Safety
/// Called by the host with its own `get_proc_address`, an opaque library
/// token and a writable initialization record.
#[no_mangle]
pub unsafe extern "C" fn gdbridge_library_init(
    get_proc_address: Option<GetProcAddress>,
    library: ClassLibraryPtr,
    r_initialization: *mut Initialization,
) -> Bool {
    ffi_guard("library_init", 0, || match init_library(get_proc_address, library, r_initialization) {
        Ok(_) => 1,
        Err(err) => {
            tracing::error!(target: "host", error = %err, "bridge initialization failed");
            0
        }
    })
}
