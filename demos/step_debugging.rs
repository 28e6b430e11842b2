//! Demonstrates stepping through a test suite with pause, resume and stop

use std::sync::Arc;

use ui_playback::playback::{PlaybackEvent, SessionConfig, SessionRegistry, SessionState};
use ui_playback::script::{Document, Expect, Operator, Step, TestCase};
use ui_playback::surface::{VirtualSurface, shared};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let surface = shared(
        VirtualSurface::new()
            .title("Checkout")
            .element("#qty", "1")
            .element("#add", "Add to cart")
            .reveal_on_click("#add", "#cart", "1 item")
            .delayed_element("#banner", "Free shipping", 2),
    );

    let document = Document::from_test_cases(vec![
        TestCase::new(
            "add-item",
            vec![
                Step::click("#add").why("put something in the cart"),
                Step::wait_for("#cart"),
            ],
        ),
        TestCase::new(
            "verify",
            vec![
                Step::assert(Some("#cart"), Expect::value(Operator::Contains, "item")),
                Step::wait_for("#banner").returns("banner_seen"),
                Step::screenshot("checkout"),
            ],
        )
        .depends_on(["add-item"]),
    ]);

    let registry = Arc::new(SessionRegistry::new());
    let id = registry.create(document, surface, SessionConfig::default().suite("checkout"));

    // Pause as soon as the second test case starts
    let control = registry.get(&id).map(|h| h.control().clone());
    registry.subscribe(&id, move |event| match event {
        PlaybackEvent::StepStart { position, step, .. } => {
            println!("> [{}] {}", position, step.summary());
            if position.test_case == Some(1) && position.step == 0 {
                if let Some(control) = &control {
                    control.pause();
                }
            }
        }
        PlaybackEvent::StepComplete { position, result, .. } => {
            let status = if result.success { "ok" } else { "FAILED" };
            println!("  [{}] {} in {}ms", position, status, result.duration_ms);
        }
        PlaybackEvent::SessionState { state, .. } => println!("  -- {}", state),
        PlaybackEvent::PlaybackComplete { success, .. } => println!("Playback success: {}", success),
    })?;

    println!("Starting run:");
    registry.start(&id)?;

    if let Some(snapshot) = registry.snapshot(&id) {
        println!("\nPaused after {} of {} steps", snapshot.results.len(), snapshot.total_steps);
    }

    println!("\nStepping once:");
    registry.step(&id)?;

    println!("\nResuming:");
    registry.resume(&id)?;

    let snapshot = registry.snapshot(&id).ok_or("session disappeared")?;
    assert_eq!(snapshot.state, SessionState::Completed);
    println!("\nCaptures: {:?}", snapshot.captures.keys().collect::<Vec<_>>());

    registry.remove(&id)?;
    Ok(())
}
