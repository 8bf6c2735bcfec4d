use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use symsrv_publish::{HashProvider, Params, PublishReport, Publisher, publish_location, publish_repository};
use symsrv_storage::backend::MockRepository;
use symsrv_storage::{ReadSeek, Repository, RepositoryHandle};
use symsrv_store::{Database, Symbol, SymbolStore};

/// Files containing `HASH:<value>` hash to `<value>`; anything else is
/// unrecognised.
struct Marker;
impl HashProvider for Marker {
    fn name(&self) -> &str {
        "marker"
    }

    fn hash(&self, stream: &mut dyn ReadSeek) -> Option<String> {
        let mut contents = String::new();
        stream.read_to_string(&mut contents).ok()?;
        contents.strip_prefix("HASH:").map(String::from)
    }
}

fn sample_repository() -> Arc<MockRepository> {
    Arc::new(
        MockRepository::with_files([
            ("a.exe", b"HASH:H1".as_slice()),
            ("sub/b.pdb", b"HASH:H2".as_slice()),
            ("sub/ignored.txt", b"HASH:H3".as_slice()),
        ])
        .with_name("repo"),
    )
}

async fn run(repository: &Arc<MockRepository>, db: &Database, params: Params) -> PublishReport {
    let publisher = Publisher::open(params, SymbolStore::from(db), Arc::new(Marker)).await;
    let handle: RepositoryHandle = repository.clone();
    publish_repository(handle, publisher, 4).await.unwrap()
}

fn params(store_root: &Path) -> Params {
    Params::new(store_root).with_flush_every(1)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publishes_eligible_artifacts_once() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::open_store(temp_dir.path()).await.unwrap();
    let repository = sample_repository();

    let report = run(&repository, &db, params(temp_dir.path())).await;
    assert_eq!(report.published, 2);
    assert_eq!(report.skipped(), 0);
    assert_eq!(report.failed, 0);
    let mut opened = repository.opened();
    opened.sort();
    assert_eq!(opened, vec!["mock://repo/a.exe", "mock://repo/sub/b.pdb"]);

    let store = SymbolStore::from(&db);
    let mut symbols = store.list_symbols().await.unwrap();
    symbols.sort_by(|a, b| a.hash.cmp(&b.hash));
    assert_eq!(symbols, vec![
        Symbol::new("H1", "a.exe").with_store_path("a.exe/H1/a.exe"),
        Symbol::new("H2", "b.pdb").with_store_path("b.pdb/H2/b.pdb"),
    ]);
    assert!(temp_dir.path().join("b.pdb/H2/b.pdb").is_file());
    assert!(store.list_sources().await.unwrap().iter().all(|source| source.loaded));

    // Second run: the persisted ledger turns both into skips.
    let report = run(&repository, &db, params(temp_dir.path())).await;
    assert_eq!(report.published, 0);
    assert_eq!(report.skipped_visited, 2);
    assert_eq!(store.list_symbols().await.unwrap().len(), 2);
    assert_eq!(repository.opened().len(), 2);
    db.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_directory_does_not_abort_crawl() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::connect_in_memory().await.unwrap();
    let repository = Arc::new(
        MockRepository::with_files([
            ("good/a.dll", b"HASH:H1".as_slice()),
            ("bad/b.dll", b"HASH:H2".as_slice()),
            ("c.pdb", b"HASH:H3".as_slice()),
        ])
        .with_failing_directory("bad"),
    );
    let report = run(&repository, &db, params(temp_dir.path())).await;
    assert_eq!(report.published, 2);
    assert_eq!(report.failed, 0);
    let store = SymbolStore::from(&db);
    assert_eq!(store.find_symbol(Some("H2"), "b.dll").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn excluded_directories_are_not_listed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::connect_in_memory().await.unwrap();
    // Listing `test` would fail; pruning means it is never attempted.
    let repository = Arc::new(
        MockRepository::with_files([("test/a.dll", b"HASH:H1".as_slice()), ("b.dll", b"HASH:H2".as_slice())])
            .with_failing_directory("test"),
    );
    let report = run(&repository, &db, params(temp_dir.path()).with_excludes(vec!["/test".to_string()])).await;
    assert_eq!(report.published, 1);
    assert_eq!(repository.opened(), vec!["mock://mock/b.dll"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failures_are_retried_next_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::connect_in_memory().await.unwrap();
    let repository = Arc::new(MockRepository::with_files([
        ("a.exe", b"not a symbol".as_slice()),
        ("pkg.nupkg", b"PK".as_slice()),
    ]));

    let report = run(&repository, &db, params(temp_dir.path())).await;
    assert_eq!(report.failed, 2);
    let report = run(&repository, &db, params(temp_dir.path())).await;
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped_visited, 0);

    let store = SymbolStore::from(&db);
    let source = store.find_source("mock://mock/a.exe").await.unwrap().unwrap();
    assert_eq!(source.failure_count, 2);

    repository.write("a.exe", b"HASH:H1".to_vec()).await.unwrap();
    let report = run(&repository, &db, params(temp_dir.path())).await;
    assert_eq!(report.published, 1);
    let source = store.find_source("mock://mock/a.exe").await.unwrap().unwrap();
    assert_eq!(source.failure_count, 0);
    assert!(source.loaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn link_mode_writes_pointers() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::connect_in_memory().await.unwrap();
    let repository = sample_repository();
    let report = run(&repository, &db, params(temp_dir.path()).with_link_mode(true)).await;
    assert_eq!(report.published, 2);
    let pointer = temp_dir.path().join("a.exe").join("H1").join(symsrv_publish::POINTER_FILE);
    assert_eq!(symsrv_publish::read_pointer(&pointer).as_deref(), Some("mock://repo/a.exe"));
    assert!(!temp_dir.path().join("a.exe/H1/a.exe").exists());
    let symbol = SymbolStore::from(&db).find_symbol(Some("H1"), "a.exe").await.unwrap().unwrap();
    assert_eq!(symbol.origin_url.as_deref(), Some("mock://repo/a.exe"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_location() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::connect_in_memory().await.unwrap();
    let repository = sample_repository();
    let root = repository.roots().await.unwrap().remove(0);
    let sub = repository.children(&root).await.unwrap().into_iter().find(|n| n.name() == "sub").unwrap();
    let node = repository.children(&sub).await.unwrap().into_iter().find(|n| n.name() == "b.pdb").unwrap();

    let publisher = Publisher::open(params(temp_dir.path()), SymbolStore::from(&db), Arc::new(Marker)).await;
    let handle: RepositoryHandle = repository.clone();
    let report = publish_location(handle, node, publisher).await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(repository.opened(), vec!["mock://repo/sub/b.pdb"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_failure_is_fatal() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::connect_in_memory().await.unwrap();
    let repository = sample_repository();
    let publisher = Publisher::open(params(temp_dir.path()), SymbolStore::from(&db), Arc::new(Marker)).await;
    db.close().await;
    let handle: RepositoryHandle = repository.clone();
    let err = publish_repository(handle, publisher, 2).await.unwrap_err();
    assert!(matches!(&*err, symsrv_publish::error::ErrorKind::Store));
}
