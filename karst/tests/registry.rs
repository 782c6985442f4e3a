//! Thread registration: dense indices, the table limit, and recycling.

use karst::{Domain, Error};
use std::sync::Arc;

#[test]
fn registration_past_the_table_limit_fails() {
    let domain = Arc::new(Domain::with_max_threads(1));
    let _main = domain.enter().unwrap();

    // Re-entering from the same thread reuses the index.
    let _again = domain.enter().unwrap();

    let domain2 = Arc::clone(&domain);
    let err = std::thread::spawn(move || domain2.enter().map(|_| ()).unwrap_err())
        .join()
        .unwrap();
    assert_eq!(err, Error::ThreadLimit { max_threads: 1 });
}

#[test]
fn exited_threads_index_is_recycled() {
    let domain = Arc::new(Domain::with_max_threads(1));

    for _ in 0..4 {
        let domain = Arc::clone(&domain);
        std::thread::spawn(move || {
            domain.enter().map(|_| ()).expect("recycled index available");
        })
        .join()
        .unwrap();
    }
}

#[test]
fn thread_limit_error_formats() {
    let err = Error::ThreadLimit { max_threads: 128 };
    assert_eq!(err.to_string(), "thread registry exhausted (128 threads)");
}
