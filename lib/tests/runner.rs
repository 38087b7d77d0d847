mod test_commit;
mod test_init;
mod test_locks;
mod test_pristine;
mod test_relocate;
mod test_scan;
mod test_schema;
mod test_work_queue;
