//! Login flow against an in-memory document that renders late.
//!
//! Run with: `cargo run --example login_flow`

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use esperar::logging;
use esperar::prelude::*;

fn main() -> EsperarResult<()> {
    logging::init("esperar=debug");

    let doc = Arc::new(MemoryDocument::new());
    let form = doc.append(None, NodeSpec::new("form").id("login"))?;
    doc.append(Some(&form), NodeSpec::new("input").attr("name", "user"))?;
    doc.append(Some(&form), NodeSpec::new("button").text("Sign in"))?;

    // The welcome banner shows up a little after the click.
    let renderer = {
        let doc = Arc::clone(&doc);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            doc.append(None, NodeSpec::new("div").class("banner").text("Welcome back, ada"))
                .unwrap();
        })
    };

    let config = Configuration::load(None)?.with_save_page_source(false);
    let dispatcher = RetryDispatcher::from_configuration(
        Arc::new(CommandRegistry::with_builtins()),
        &config,
    );

    let login = dispatcher.element(doc.as_ref(), LocatorChain::root("#login"));
    login.find("input[name=user]").set_value("ada")?;
    login.find("button").click()?;

    let banner = dispatcher
        .element(doc.as_ref(), LocatorChain::root(".banner"))
        .should(&condition::text("welcome"))?;
    println!("banner: {}", banner.text()?);

    renderer.join().unwrap();
    Ok(())
}
