//! Integration tests for the virtual-host registry
//!
//! These tests verify:
//! - Declare, redeclare and passive declare semantics
//! - Which topology changes reach the metadata store
//! - Routing through the registry, including under concurrent binds

use std::{collections::HashSet, sync::Arc, thread};

use anvil_exchange::{DeclareOutcome, ExchangeError, FieldTable, FieldValue, VirtualHost};
use anvil_storage::{MemoryStorage, StorageError};

fn setup() -> (Arc<VirtualHost>, Arc<MemoryStorage>) {
	let storage = Arc::new(MemoryStorage::new());
	let vhost = Arc::new(VirtualHost::new("/", storage.clone()));
	vhost.declare_system_exchanges();
	(vhost, storage)
}

fn declare(
	vhost: &VirtualHost,
	name: &str,
	kind: &str,
	durable: bool,
) -> Result<DeclareOutcome, ExchangeError> {
	vhost.declare_exchange(name, kind, durable, false, false, FieldTable::new())
}

fn bind(vhost: &VirtualHost, exchange: &str, queue: &str, routing_key: &str) -> bool {
	vhost
		.bind_queue(exchange, queue, routing_key, FieldTable::new(), true)
		.unwrap()
}

fn queues(names: &[&str]) -> HashSet<String> {
	names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_redeclare_is_idempotent() {
	let (vhost, storage) = setup();

	assert_eq!(declare(&vhost, "orders", "direct", true).unwrap(), DeclareOutcome::Created);
	assert_eq!(declare(&vhost, "orders", "direct", true).unwrap(), DeclareOutcome::Existing);
	assert_eq!(storage.keys(), vec![vhost.exchange_key("orders")]);
}

#[test]
fn test_redeclare_conflict_names_attribute() {
	let (vhost, _) = setup();
	declare(&vhost, "orders", "direct", true).unwrap();
	bind(&vhost, "orders", "q1", "new");

	match declare(&vhost, "orders", "fanout", true) {
		Err(ExchangeError::Conflict(conflict)) => {
			assert_eq!(conflict.attribute, "type");
			assert_eq!(conflict.current, "direct");
			assert_eq!(conflict.received, "fanout");
		}
		other => panic!("expected conflict, got {:?}", other),
	}

	match declare(&vhost, "orders", "direct", false) {
		Err(ExchangeError::Conflict(conflict)) => assert_eq!(conflict.attribute, "durable"),
		other => panic!("expected conflict, got {:?}", other),
	}

	// nothing changed
	let exchange = vhost.exchange("orders").unwrap();
	assert!(exchange.is_durable());
	assert_eq!(exchange.binding_count(), 1);
	assert_eq!(vhost.route("orders", "new", None), queues(&["q1"]));
}

#[test]
fn test_passive_declare_never_creates() {
	let (vhost, storage) = setup();

	assert!(matches!(
		vhost.declare_exchange_passive("missing", false),
		Err(ExchangeError::NotFound(name)) if name == "missing"
	));
	assert!(vhost.declare_exchange_passive("missing", true).unwrap().is_none());
	assert!(vhost.exchange("missing").is_none());

	declare(&vhost, "present", "topic", false).unwrap();
	let found = vhost.declare_exchange_passive("present", false).unwrap().unwrap();
	assert_eq!(found.name(), "present");

	// reserved names can still be checked
	assert!(vhost.declare_exchange_passive("amq.topic", false).unwrap().is_some());
	assert!(storage.is_empty());
}

#[test]
fn test_failed_persist_registers_nothing() {
	let (vhost, storage) = setup();

	storage.fail_next_batches(1);
	let result = declare(&vhost, "orders", "direct", true);
	assert!(matches!(result, Err(ExchangeError::Persistence(StorageError::Io(_)))));
	assert!(vhost.exchange("orders").is_none());

	// non-durable exchanges never touch the store
	storage.fail_next_batches(1);
	declare(&vhost, "scratch", "direct", false).unwrap();
	storage.fail_next_batches(0);
	assert!(storage.is_empty());
}

#[test]
fn test_binding_persisted_only_when_both_sides_durable() {
	let (vhost, storage) = setup();
	declare(&vhost, "durable-ex", "direct", true).unwrap();
	declare(&vhost, "transient-ex", "direct", false).unwrap();

	assert!(vhost
		.bind_queue("durable-ex", "durable-q", "k", FieldTable::new(), true)
		.unwrap());
	assert!(vhost
		.bind_queue("durable-ex", "transient-q", "k", FieldTable::new(), false)
		.unwrap());
	assert!(vhost
		.bind_queue("transient-ex", "durable-q", "k", FieldTable::new(), true)
		.unwrap());

	let binding_keys: Vec<String> = storage
		.keys()
		.into_iter()
		.filter(|k| k.starts_with("binding."))
		.collect();
	assert_eq!(binding_keys.len(), 1);

	let durable_bindings = vhost.exchange("durable-ex").unwrap().bindings();
	let persisted = durable_bindings
		.iter()
		.find(|b| b.queue() == "durable-q")
		.unwrap();
	assert_eq!(binding_keys[0], vhost.binding_key(persisted));
}

#[test]
fn test_duplicate_bind_is_noop() {
	let (vhost, storage) = setup();
	declare(&vhost, "orders", "direct", true).unwrap();

	assert!(bind(&vhost, "orders", "q1", "new"));
	let stored = storage.len();

	assert!(!bind(&vhost, "orders", "q1", "new"));
	assert_eq!(vhost.exchange("orders").unwrap().binding_count(), 1);
	assert_eq!(storage.len(), stored);
}

#[test]
fn test_bind_errors() {
	let (vhost, _) = setup();
	declare(&vhost, "docs", "headers", false).unwrap();

	let result = vhost.bind_queue("missing", "q1", "", FieldTable::new(), true);
	assert!(matches!(result, Err(ExchangeError::NotFound(_))));

	let mut args = FieldTable::new();
	args.insert("x-match".to_string(), FieldValue::from("most"));
	let result = vhost.bind_queue("docs", "q1", "", args, true);
	assert!(matches!(result, Err(ExchangeError::Validation(_))));
	assert_eq!(vhost.exchange("docs").unwrap().binding_count(), 0);
}

#[test]
fn test_oversized_binding_fields_rejected() {
	let (vhost, storage) = setup();
	declare(&vhost, "ex", "direct", true).unwrap();

	let long_key = "k".repeat(300);
	let result = vhost.bind_queue("ex", "q", &long_key, FieldTable::new(), true);
	assert!(matches!(result, Err(ExchangeError::Validation(_))));

	let long_queue = "q".repeat(256);
	let result = vhost.bind_queue("ex", &long_queue, "k", FieldTable::new(), true);
	assert!(matches!(result, Err(ExchangeError::Validation(_))));

	let result = vhost.unbind_queue("ex", "q", &long_key, FieldTable::new());
	assert!(matches!(result, Err(ExchangeError::Validation(_))));

	assert_eq!(vhost.exchange("ex").unwrap().binding_count(), 0);
	assert_eq!(storage.keys(), vec![vhost.exchange_key("ex")]);
}

#[test]
fn test_duplicate_bind_with_nan_argument_is_noop() {
	let (vhost, storage) = setup();
	declare(&vhost, "metrics", "fanout", true).unwrap();

	let mut args = FieldTable::new();
	args.insert("threshold".to_string(), FieldValue::Float(f64::NAN));

	assert!(vhost.bind_queue("metrics", "q1", "", args.clone(), true).unwrap());
	assert!(!vhost.bind_queue("metrics", "q1", "", args.clone(), true).unwrap());
	assert_eq!(vhost.exchange("metrics").unwrap().binding_count(), 1);
	assert_eq!(storage.len(), 2);

	assert!(vhost.unbind_queue("metrics", "q1", "", args).unwrap());
	assert_eq!(vhost.exchange("metrics").unwrap().binding_count(), 0);
}

#[test]
fn test_unbind_removes_record() {
	let (vhost, storage) = setup();
	declare(&vhost, "orders", "direct", true).unwrap();
	bind(&vhost, "orders", "q1", "new");
	assert_eq!(storage.len(), 2);

	assert!(vhost
		.unbind_queue("orders", "q1", "new", FieldTable::new())
		.unwrap());
	assert!(!vhost
		.unbind_queue("orders", "q1", "new", FieldTable::new())
		.unwrap());
	assert_eq!(storage.keys(), vec![vhost.exchange_key("orders")]);
	assert!(vhost.route("orders", "new", None).is_empty());
}

#[test]
fn test_auto_delete_exchange_removed_with_last_binding() {
	let (vhost, storage) = setup();
	vhost
		.declare_exchange("session", "fanout", true, true, false, FieldTable::new())
		.unwrap();
	bind(&vhost, "session", "q1", "");
	bind(&vhost, "session", "q2", "");

	vhost
		.unbind_queue("session", "q1", "", FieldTable::new())
		.unwrap();
	assert!(vhost.exchange("session").is_some());

	vhost
		.unbind_queue("session", "q2", "", FieldTable::new())
		.unwrap();
	assert!(vhost.exchange("session").is_none());
	assert!(storage.is_empty());
}

#[test]
fn test_remove_queue_bindings_across_exchanges() {
	let (vhost, storage) = setup();
	declare(&vhost, "orders", "direct", true).unwrap();
	declare(&vhost, "events", "topic", true).unwrap();
	bind(&vhost, "orders", "q1", "new");
	bind(&vhost, "orders", "q2", "new");
	bind(&vhost, "events", "q1", "order.#");

	let removed = vhost.remove_queue_bindings("q1").unwrap();
	assert_eq!(removed.len(), 2);
	assert!(removed.iter().all(|b| b.queue() == "q1"));

	let remaining: Vec<_> = vhost
		.exchange("orders")
		.unwrap()
		.bindings()
		.iter()
		.map(|b| b.queue().to_string())
		.collect();
	assert_eq!(remaining, vec!["q2".to_string()]);
	assert_eq!(vhost.exchange("events").unwrap().binding_count(), 0);

	let binding_records = storage
		.keys()
		.into_iter()
		.filter(|k| k.starts_with("binding."))
		.count();
	assert_eq!(binding_records, 1);
}

#[test]
fn test_remove_queue_bindings_failure_keeps_memory_change() {
	let (vhost, storage) = setup();
	declare(&vhost, "orders", "direct", true).unwrap();
	bind(&vhost, "orders", "q1", "new");

	storage.fail_next_batches(1);
	let result = vhost.remove_queue_bindings("q1");
	assert!(matches!(result, Err(ExchangeError::Persistence(_))));

	assert_eq!(vhost.exchange("orders").unwrap().binding_count(), 0);
	assert_eq!(storage.len(), 2);
}

#[test]
fn test_delete_exchange() {
	let (vhost, storage) = setup();
	declare(&vhost, "orders", "direct", true).unwrap();
	bind(&vhost, "orders", "q1", "new");

	assert!(matches!(
		vhost.delete_exchange("orders", true),
		Err(ExchangeError::InUse(_))
	));
	assert!(matches!(
		vhost.delete_exchange("missing", false),
		Err(ExchangeError::NotFound(_))
	));

	vhost.delete_exchange("orders", false).unwrap();
	assert!(vhost.exchange("orders").is_none());
	assert!(storage.is_empty());
	assert!(vhost.route("orders", "new", None).is_empty());
}

#[test]
fn test_route_through_system_exchanges() {
	let (vhost, _) = setup();
	bind(&vhost, "amq.fanout", "q1", "");
	bind(&vhost, "amq.fanout", "q2", "");
	bind(&vhost, "amq.topic", "q3", "#.rabbit");

	let mut args = FieldTable::new();
	args.insert("x-match".to_string(), FieldValue::from("any"));
	args.insert("format".to_string(), FieldValue::from("pdf"));
	args.insert("type".to_string(), FieldValue::from("report"));
	vhost
		.bind_queue("amq.headers", "q4", "", args, false)
		.unwrap();

	assert_eq!(vhost.route("amq.fanout", "whatever", None), queues(&["q1", "q2"]));
	assert_eq!(vhost.route("amq.topic", "rabbit", None), queues(&["q3"]));

	let mut headers = FieldTable::new();
	headers.insert("type".to_string(), FieldValue::from("report"));
	assert_eq!(vhost.route("amq.headers", "", Some(&headers)), queues(&["q4"]));
	assert!(vhost.route("amq.headers", "", None).is_empty());

	assert!(vhost.route("no-such-exchange", "rabbit", None).is_empty());
}

#[test]
fn test_concurrent_binds_and_routes() {
	let (vhost, _) = setup();
	declare(&vhost, "broadcast", "fanout", false).unwrap();

	let writers: Vec<_> = (0..4)
		.map(|t| {
			let vhost = vhost.clone();
			thread::spawn(move || {
				for i in 0..50 {
					bind(&vhost, "broadcast", &format!("q-{}-{}", t, i), "");
				}
			})
		})
		.collect();

	let readers: Vec<_> = (0..4)
		.map(|_| {
			let vhost = vhost.clone();
			thread::spawn(move || {
				let mut last = 0;
				for _ in 0..200 {
					let routed = vhost.route("broadcast", "", None).len();
					// binding sets only grow here
					assert!(routed >= last);
					last = routed;
				}
			})
		})
		.collect();

	for handle in writers.into_iter().chain(readers) {
		handle.join().unwrap();
	}

	assert_eq!(vhost.route("broadcast", "", None).len(), 200);
}
