//! Tests around missing files and graph errors.

use crate::*;

#[test]
fn missing_source_fails_before_running() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    // "in" is never written.
    let out = space.run(&mut ebb_command(vec!["out"]))?;
    assert_eq!(out.status.code(), Some(2));
    let err = std::str::from_utf8(&out.stderr)?;
    assert!(err.contains("needed by"), "{:?}", err);
    // No command ran.
    assert!(space.read("out").is_err());
    Ok(())
}

#[test]
fn dependency_cycle_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build a: touch b", "build b: touch a", ""].join("\n"),
    )?;
    let out = space.run(&mut ebb_command(vec!["a"]))?;
    assert_eq!(out.status.code(), Some(2));
    let err = std::str::from_utf8(&out.stderr)?;
    assert!(err.contains("cycle"), "{:?}", err);
    Ok(())
}

#[test]
fn missing_generated_input_gets_built() -> anyhow::Result<()> {
    // An input that does not exist but has a producer is not an error;
    // it is simply built first.
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build mid: touch in", "build out: touch mid", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut ebb_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert!(space.read("mid").is_ok());
    assert!(space.read("out").is_ok());
    Ok(())
}
