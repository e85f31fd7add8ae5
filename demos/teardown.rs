//! Tears down a database connection, test data and a remote connection in
//! reverse order of setup.
//!
//! ```text
//! cargo run --example teardown
//! ```

use deferral::{Error, Scope, deferred_async};

fn main() {
    let job = deferred_async(|scope: Scope<(), Error>, ()| async move {
        println!("1. create database connection...");
        scope.defer_async(|_| async {
            println!("7. destroy database connection!");
            Ok(())
        });

        println!("2. insert test data...");
        scope.defer_async(|_| async {
            println!("6. remove test data!");
            Ok(())
        });

        println!("3. report to remote server...");
        scope.defer_async(|_| async {
            println!("5. close remote connection!");
            Ok(())
        });

        println!("4. job done.");
        Ok(())
    });

    if let Err(err) = job.call(()).wait() {
        eprintln!("teardown demo failed: {err}");
        std::process::exit(1);
    }
}
