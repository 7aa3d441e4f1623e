//! Integration tests for reads through the content cache

mod common;

use cachedfs::{CachingDriver, DriverOptions, Error, MemoryBackend, MoveOptions};
use common::{Fixture, init_tracing, p};
use std::io::Read;

#[test]
fn test_second_read_served_locally() {
    let fx = Fixture::new();
    fx.backend.external_write("/f", b"hello");

    assert_eq!(fx.read("/f"), b"hello");
    assert!(fx.driver.content_cache().contains(&p("/f")));

    fx.backend.reset_calls();
    assert_eq!(fx.read("/f"), b"hello");
    assert_eq!(fx.backend.calls().total(), 0);

    let stats = fx.driver.content_cache().stats().snapshot();
    assert_eq!((stats.hits, stats.misses, stats.inserts), (1, 1, 1));
}

#[test]
fn test_truncated_download_is_not_cached() {
    let fx = Fixture::new();
    fx.backend.external_write("/big", b"0123456789");
    fx.backend.truncate_downloads(Some(4));

    assert_eq!(fx.read("/big"), b"0123");
    assert!(!fx.driver.content_cache().contains(&p("/big")));
    assert_eq!(fx.driver.content_cache().stats().rejected_count(), 1);

    let root = fx.driver.content_cache().root().unwrap();
    assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);

    fx.backend.truncate_downloads(None);
    assert_eq!(fx.read("/big"), b"0123456789");
    assert!(fx.driver.content_cache().contains(&p("/big")));
    assert_eq!(fx.backend.calls().download, 2);
}

#[test]
fn test_disabled_file_cache_always_downloads() {
    init_tracing();
    let backend = MemoryBackend::new();
    backend.external_write("/f", b"abc");
    let driver = CachingDriver::new(
        backend.clone(),
        DriverOptions {
            disable_file_cache: true,
            ..DriverOptions::default()
        },
    )
    .unwrap();
    assert!(!driver.content_cache().is_enabled());

    for _ in 0..2 {
        let mut content = Vec::new();
        driver
            .open_read(&p("/f"))
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"abc");
    }
    assert_eq!(backend.calls().download, 2);
}

#[test]
fn test_delete_drops_cached_content() {
    let fx = Fixture::new();
    fx.backend.external_write("/f", b"data");
    fx.read("/f");

    fx.driver.delete(&p("/f")).unwrap();
    assert!(!fx.driver.content_cache().contains(&p("/f")));
}

#[test]
fn test_move_drops_cached_content() {
    let fx = Fixture::new();
    fx.backend.external_write("/a", b"aaa");
    fx.backend.external_write("/b", b"bbb");
    fx.read("/a");
    fx.read("/b");

    fx.driver
        .move_path(&p("/a"), &p("/b"), MoveOptions::replace())
        .unwrap();

    assert!(!fx.driver.content_cache().contains(&p("/a")));
    assert!(!fx.driver.content_cache().contains(&p("/b")));
    assert_eq!(fx.read("/b"), b"aaa");
}

#[test]
fn test_disposed_cache_passes_through() {
    let fx = Fixture::new();
    fx.backend.external_write("/f", b"data");
    fx.read("/f");

    let root = fx.driver.content_cache().root().unwrap();
    fx.driver.content_cache().dispose().unwrap();
    assert!(!root.exists());

    fx.backend.reset_calls();
    assert_eq!(fx.read("/f"), b"data");
    assert_eq!(fx.backend.calls().download, 1);
}

#[test]
fn test_open_read_on_folder() {
    let fx = Fixture::new();
    fx.backend.external_mkdir("/d");
    match fx.driver.open_read(&p("/d")) {
        Err(Error::IsADirectory { path }) => assert_eq!(path, p("/d")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("reading a folder should fail"),
    }
    assert_eq!(fx.backend.calls().download, 0);
}
