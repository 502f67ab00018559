#![no_main]
use libfuzzer_sys::fuzz_target;

use aml_exec::{AmlNamePath, Namespace};
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fuzz_target!(|data: &[u8]| {
    if let Ok(false) = INITIALIZED.compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed) {
        simplelog::SimpleLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default()).unwrap();
    }

    let (path, length) = match AmlNamePath::parse(data) {
        Ok(parsed) => parsed,
        Err(_) => return,
    };
    assert!(length <= data.len());

    let name = path.to_name();
    assert_eq!(path.stringify(), name.to_string());

    let mut namespace = Namespace::with_predefined();
    let scope = namespace.search("\\_SB").unwrap();
    if let Ok(Some(handle)) = namespace.resolve(scope, &path) {
        log::trace!("Resolved {} to {}", path, namespace.path_of(handle));
    }
    if let Ok(handle) = namespace.resolve_or_create(scope, &path) {
        assert_eq!(namespace.resolve(namespace.root(), &namespace.path_of(handle).as_path()), Ok(Some(handle)));
    }
});
