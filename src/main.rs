use marquee::{LoadTest, MarqueeError};

fn main() -> Result<(), MarqueeError> {
    let metrics = LoadTest::initialize()?.execute()?;

    // Exit non-zero when nothing at all succeeded, so scripted runs notice a dead target.
    let global = &metrics.statistics.global;
    if global.total_count > 0 && global.success_count == 0 {
        eprintln!("all {} requests failed", global.total_count);
        std::process::exit(2);
    }

    Ok(())
}
