use crate::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run(&mut ebb_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ebb_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());

    // A second build does nothing.
    let out = space.run_expect(&mut ebb_command(vec!["out"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

#[test]
fn default_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", "default out", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ebb_command(vec![]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn dry_run_runs_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut ebb_command(vec!["-n", "out"]))?;
    assert_output_contains(&out, "touch out");
    assert!(space.read("out").is_err());
    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_command() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule bad
  command = echo scary error; exit 1

build out: bad in
",
    )?;
    space.write("in", "")?;
    let out = space.run(&mut ebb_command(vec!["out"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "scary error");
    Ok(())
}

#[test]
fn parse_error_exit_code() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "build out touch in\n")?;
    let out = space.run(&mut ebb_command(vec!["out"]))?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[test]
fn unknown_target_exit_code() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run(&mut ebb_command(vec!["wrong"]))?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[cfg(unix)]
#[test]
fn rspfile_is_written_and_cleaned_up() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cat_rsp
  command = cat ${out}.rsp > ${out}
  rspfile = ${out}.rsp
  rspfile_content = 1 $in 2

build out: cat_rsp in1 in2
",
    )?;
    space.write("in1", "")?;
    space.write("in2", "")?;
    space.run_expect(&mut ebb_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"1 in1 in2 2");
    // The rsp file is removed after success.
    assert!(space.read("out.rsp").is_err());
    Ok(())
}
