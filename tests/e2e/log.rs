//! Tests around build log persistence.

use crate::*;

#[test]
fn log_written_with_signature() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ebb_command(vec!["out"]))?;

    let log = space.read(".ebb_log")?;
    let log = std::str::from_utf8(&log)?;
    assert!(log.starts_with("# ninja log v4\n"), "{:?}", log);
    let record = log.lines().nth(1).unwrap();
    assert!(record.ends_with("\tout\ttouch out"), "{:?}", record);
    Ok(())
}

#[test]
fn command_change_triggers_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ebb_command(vec!["out"]))?;

    // Rewrite the rule so the command differs; mtimes alone say clean.
    #[cfg(unix)]
    let changed = "
rule touch
  command = touch $out && true
  description = touch $out

build out: touch in
";
    #[cfg(windows)]
    let changed = "
rule touch
  command = cmd /c type nul > $out & rem
  description = touch $out

build out: touch in
";
    space.write("build.ninja", changed)?;
    let out = space.run_expect(&mut ebb_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[test]
fn dry_run_does_not_create_log() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ebb_command(vec!["-n", "out"]))?;
    assert!(space.read(".ebb_log").is_err());
    Ok(())
}
