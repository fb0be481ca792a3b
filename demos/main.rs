//! Runnable demonstration of the write pipeline: configures a
//! block-buffered destination, emits a few records including a nested
//! action, and shuts down cleanly.

use std::time::Duration;

use logxpy::{
    DestinationKind, DestinationSpec, Logger, OrderedFields, WriterConfig,
};

fn main() {
    env_logger::init();

    let path = std::env::temp_dir().join("logxpy-demo.ndjson");
    let config = WriterConfig::new()
        .batch_size(16)
        .flush_interval(Duration::from_millis(100));
    let logger = Logger::new(
        config,
        vec![DestinationSpec::new(&path, DestinationKind::BlockBuffered)],
    )
    .expect("failed to start logxpy demo logger");

    logger.info("demo starting");

    {
        let action = logger.start_action("process_batch");
        let mut fields = OrderedFields::new();
        fields.push("batch_size", 16u32);
        logger.log_with_fields(logxpy::Level::Debug, "processing items", fields);
        action.succeed();
    }

    logger.warning("a warning record");
    logger.success("demo finished");

    if !logger.flush(Duration::from_secs(2)) {
        eprintln!("flush did not complete in time");
    }
    logger.shutdown(Duration::from_secs(2));

    println!("wrote records to {}", path.display());
}
