use std::sync::Arc;

use super::*;
use crate::result::{FieldInfo, ResultStatus};
use crate::transport::MemoryTransport;
use crate::wire::{encode_cstring_message, encode_parameter_status, encode_row_description, encode_tuple, tags};

fn settings(protocol: &str) -> ConnSettings {
    ConnSettings {
        server: Some("localhost".into()),
        database: Some("sales".into()),
        protocol: Some(protocol.into()),
        ..Default::default()
    }
}

fn ready() -> Vec<u8> { vec![tags::READY] }

fn complete(tag: &str) -> Vec<u8> {
    let mut b = encode_cstring_message(tags::COMMAND_COMPLETE, tag);
    b.extend(ready());
    b
}

fn hello() -> Vec<u8> {
    let mut b = vec![tags::AUTH_OK];
    b.extend(encode_parameter_status("server_encoding", "UTF8"));
    b.extend(ready());
    b
}

fn text_column(name: &str) -> FieldInfo { FieldInfo::new(name, 25, -1, -1) }

/// Rows of one text column followed by `C tag` and ready.
fn rows(generation: ProtocolGeneration, values: &[&str], tag: &str) -> Vec<u8> {
    let mut b = encode_row_description(&[text_column("v")]);
    for v in values {
        b.extend(encode_tuple(generation, false, &[Some(v.as_bytes())]));
    }
    b.extend(complete(tag));
    b
}

fn connect_over(s: ConnSettings) -> (Arc<Connection>, MemoryTransport) {
    let generation = ProtocolGeneration::resolve(s.protocol.as_deref());
    let gw = MemoryTransport::new();
    gw.push_input(&hello());
    gw.push_input(&complete("SET"));
    if generation.version().at_least(7, 4) { gw.push_input(&complete("SET")); }
    let conn = Connection::create();
    conn.connect_with(s, Some("bob"), Some("secret"), Box::new(gw.clone())).unwrap();
    gw.take_output();
    (conn, gw)
}

fn connected(protocol: &str) -> (Arc<Connection>, MemoryTransport) { connect_over(settings(protocol)) }

fn sent(gw: &MemoryTransport) -> String { String::from_utf8_lossy(&gw.take_output()).into_owned() }

#[test]
fn connect_applies_session_defaults() {
    let gw = MemoryTransport::new();
    gw.push_input(&hello());
    gw.push_input(&complete("SET"));
    gw.push_input(&complete("SET"));
    let conn = Connection::create();
    conn.connect_with(settings("7.4"), Some("bob"), Some("secret"), Box::new(gw.clone())).unwrap();
    assert_eq!(conn.status(), ConnStatus::Connected);
    assert_eq!(conn.server_encoding().as_deref(), Some("UTF8"));
    assert_eq!(conn.settings().username.as_deref(), Some("bob"));
    assert_eq!(gw.monikers(), vec!["tcp:localhost:5432".to_string()]);
    let out = sent(&gw);
    assert!(out.starts_with("Ssales\0bob\0secret\0"));
    assert!(out.contains("set DateStyle to 'ISO'"));
    assert!(out.contains("set extra_float_digits to 2"));
    // the internal statement is gone again
    assert_eq!(conn.statement_count(), 0);
    assert_eq!(gw.remaining(), 0);
}

#[test]
fn legacy_session_skips_float_digits() {
    let (conn, gw) = connected("6.4");
    assert_eq!(conn.generation(), ProtocolGeneration::V64);
    assert_eq!(gw.remaining(), 0);
    assert_eq!(conn.max_query_len(), crate::protocol::BLCKSZ);
}

#[test]
fn statements_reuse_slots_and_grow_by_increment() {
    let conn = Connection::create();
    let stmts: Vec<_> = (0..STMT_INCREMENT).map(|_| Statement::new()).collect();
    for (i, s) in stmts.iter().enumerate() {
        assert_eq!(conn.add_statement(s).unwrap(), i);
    }
    assert_eq!(conn.statement_capacity(), STMT_INCREMENT);

    let extra = Statement::new();
    assert_eq!(conn.add_statement(&extra).unwrap(), STMT_INCREMENT);
    assert_eq!(conn.statement_capacity(), 2 * STMT_INCREMENT);

    conn.remove_statement(&stmts[3]).unwrap();
    let again = Statement::new();
    assert_eq!(conn.add_statement(&again).unwrap(), 3);
    assert_eq!(conn.statement_count(), STMT_INCREMENT + 1);
    assert!(again.is_attached());
    assert!(conn.add_statement(&again).is_err());
}

#[test]
fn removing_a_foreign_statement_is_rejected() {
    let conn = Connection::create();
    let stray = Statement::new();
    assert!(matches!(conn.remove_statement(&stray), Err(DriverError::InvalidHandle { .. })));
}

#[test]
fn descriptors_share_the_slot_discipline() {
    let conn = Connection::create();
    let a = Descriptor::new(crate::descriptor::DescriptorKind::AppRow);
    let b = Descriptor::new(crate::descriptor::DescriptorKind::ImpRow);
    assert_eq!(conn.add_descriptor(&a), 0);
    assert_eq!(conn.add_descriptor(&b), 1);
    assert!(conn.remove_descriptor(&a));
    assert!(a.connection().is_none());
    assert!(!conn.remove_descriptor(&a));
    assert_eq!(conn.descriptor_count(), 1);
    assert_eq!(conn.descriptor_capacity(), STMT_INCREMENT);
}

#[test]
fn zero_code_flags_no_statement() {
    let conn = Connection::create();
    let s = conn.alloc_statement().unwrap();
    conn.set_error(codes::NO_ERROR, "nothing");
    assert!(!s.has_connection_error());
    assert_eq!(conn.get_error(), None);
}

#[test]
fn connection_error_is_read_once() {
    let conn = Connection::create();
    let a = conn.alloc_statement().unwrap();
    let b = conn.alloc_statement().unwrap();
    conn.set_error(codes::CONNECTION_NO_SUCH_DATABASE, "boom");
    assert!(a.has_connection_error() && b.has_connection_error());

    let err = conn.get_error().unwrap();
    assert_eq!(err.code(), codes::CONNECTION_NO_SUCH_DATABASE);
    assert_eq!(err.message(), "boom");
    assert!(matches!(err, DriverError::Communication { .. }));
    assert_eq!(conn.get_error(), None);
    assert_eq!(conn.last_error_text().as_deref(), Some("boom"));

    // the flag outlives the read, but there is nothing left to report
    assert_eq!(a.get_error(), None);
    assert!(!a.has_connection_error());

    conn.set_error(codes::CONN_IN_USE, "again");
    let via_stmt = b.get_error().unwrap();
    assert!(matches!(via_stmt, DriverError::Busy { .. }));
    assert_eq!(conn.get_error(), None);

    conn.set_error(codes::CONN_IN_USE, "cleared");
    conn.clear_error();
    assert_eq!(conn.get_error(), None);
    assert_eq!(conn.last_error_text(), None);
}

#[test]
fn disconnect_while_executing_is_busy() {
    let (conn, gw) = connected("7.4");
    let s = conn.alloc_statement().unwrap();
    conn.force_status(ConnStatus::Executing);
    let err = conn.disconnect().unwrap_err();
    assert!(matches!(err, DriverError::Busy { .. }));
    assert_eq!(err.message(), BUSY_MESSAGE);
    assert_eq!(conn.statement_count(), 1);
    assert!(s.is_attached());
    assert!(matches!(conn.destroy(), Err(DriverError::Busy { .. })));

    conn.force_status(ConnStatus::Connected);
    conn.disconnect().unwrap();
    assert_eq!(conn.status(), ConnStatus::NotConnected);
    assert_eq!(conn.statement_count(), 0);
    assert_eq!(conn.statement_capacity(), STMT_INCREMENT);
    assert!(!s.is_attached());
    assert_eq!(sent(&gw).as_bytes(), &[tags::TERMINATE]);
    assert_eq!(conn.settings(), ConnSettings::default());
}

#[test]
fn begin_execution_guards_status() {
    let conn = Connection::create();
    assert!(matches!(conn.begin_execution(), Err(DriverError::Communication { .. })));
    conn.force_status(ConnStatus::Connected);
    {
        let _g = conn.begin_execution().unwrap();
        assert_eq!(conn.status(), ConnStatus::Executing);
        assert!(matches!(conn.begin_execution(), Err(DriverError::Busy { .. })));
    }
    assert_eq!(conn.status(), ConnStatus::Connected);
}

#[test]
fn cursor_counter_follows_bindings() {
    let conn = Connection::create();
    let mut r = ResultCache::for_connection(&conn);
    r.set_cursor(Some("a"));
    assert_eq!(conn.cursors(), 1);
    r.set_cursor(Some("b"));
    assert_eq!(conn.cursors(), 1);
    r.set_cursor(None);
    assert_eq!(conn.cursors(), 0);
    r.set_cursor(Some("c"));
    let mut other = ResultCache::for_connection(&conn);
    other.set_cursor(Some("d"));
    assert_eq!(conn.cursors(), 2);
    drop(r);
    other.destroy();
    assert_eq!(conn.cursors(), 0);
}

#[test]
fn discards_run_newest_first() {
    let (conn, gw) = connected("7.4");
    conn.mark_object_to_discard('p', "c1");
    conn.mark_object_to_discard('s', "p1");
    assert_eq!(conn.pending_discards(), vec!["pc1".to_string(), "sp1".to_string()]);
    gw.push_input(&complete("DEALLOCATE"));
    gw.push_input(&complete("CLOSE CURSOR"));
    assert_eq!(conn.discard_marked_objects(), 2);
    let out = sent(&gw);
    let dealloc = out.find("DEALLOCATE \"p1\"").unwrap();
    let close = out.find("CLOSE \"c1\"").unwrap();
    assert!(dealloc < close);
    assert!(conn.pending_discards().is_empty());
}

#[test]
fn failed_discard_is_dropped() {
    let (conn, gw) = connected("7.4");
    conn.mark_object_to_discard('p', "gone");
    let mut err = encode_cstring_message(tags::ERROR, "cursor \"gone\" does not exist");
    err.extend(ready());
    gw.push_input(&err);
    assert_eq!(conn.discard_marked_objects(), 0);
    assert!(conn.pending_discards().is_empty());
    assert_eq!(conn.status(), ConnStatus::Connected);
}

#[test]
fn second_connect_is_refused() {
    let (conn, _gw) = connected("7.4");
    let err = conn.connect_with(settings("7.4"), None, None, Box::new(MemoryTransport::new())).unwrap_err();
    assert_eq!(err.code(), codes::CONN_OPENDB_ERROR);
    assert_eq!(err.message(), "Already connected.");
}

#[test]
fn missing_database_is_a_configuration_error() {
    let conn = Connection::create();
    let s = ConnSettings { server: Some("localhost".into()), ..Default::default() };
    let err = conn.connect_with(s, None, None, Box::new(MemoryTransport::new())).unwrap_err();
    assert!(matches!(err, DriverError::Configuration { .. }));
    assert_eq!(conn.status(), ConnStatus::NotConnected);
    assert!(matches!(conn.get_error(), Some(DriverError::Configuration { .. })));
}

#[test]
fn gateway_rejection_fails_connect() {
    let gw = MemoryTransport::new();
    gw.push_input(&encode_cstring_message(tags::ERROR, "database \"sales\" does not exist"));
    let conn = Connection::create();
    let err = conn.connect_with(settings("7.4"), None, None, Box::new(gw.clone())).unwrap_err();
    assert_eq!(err.code(), codes::CONNECTION_NO_SUCH_DATABASE);
    assert_eq!(conn.status(), ConnStatus::NotConnected);
}

#[test]
fn browse_connect_is_not_implemented() {
    let conn = Connection::create();
    let err = conn.browse_connect("DSN=x").unwrap_err();
    assert!(matches!(err, DriverError::NotImplemented { .. }));
    assert_eq!(err.message(), "Function not implemented");
}

#[test]
fn transactions_are_unsupported() {
    let conn = Connection::create();
    assert!(!conn.transactions_supported());
    assert!(!conn.begin());
    assert!(!conn.commit());
    assert!(!conn.abort());
    assert_eq!(conn.isolation(), IsolationLevel::ReadCommitted);
}

#[test]
fn legacy_query_length_is_bounded() {
    let (conn, gw) = connected("6.3");
    let long = format!("select '{}'", "x".repeat(crate::protocol::BLCKSZ));
    let err = conn.send_query(&long).unwrap_err();
    assert_eq!(err.code(), codes::CONNECTION_MSG_TOO_LONG);
    assert!(gw.take_output().is_empty());
    assert_eq!(conn.status(), ConnStatus::Connected);
}

#[test]
fn current_schema_is_cached_until_search_path_changes() {
    let (conn, gw) = connected("7.4");
    gw.push_input(&rows(ProtocolGeneration::V74, &["public"], "SELECT"));
    assert_eq!(conn.current_schema().as_deref(), Some("public"));
    assert!(sent(&gw).contains("select current_schema()"));
    assert_eq!(conn.current_schema().as_deref(), Some("public"));
    assert!(gw.take_output().is_empty());

    gw.push_input(&complete("SET"));
    conn.send_query("SET search_path TO audit").unwrap();
    gw.push_input(&rows(ProtocolGeneration::V74, &["audit"], "SELECT"));
    assert_eq!(conn.current_schema().as_deref(), Some("audit"));
}

#[test]
fn old_gateways_have_no_schema() {
    let (conn, gw) = connected("6.2");
    assert_eq!(conn.current_schema(), None);
    assert!(gw.take_output().is_empty());
}

#[test]
fn search_path_detection() {
    assert!(query::is_setting_search_path("set search_path to a"));
    assert!(query::is_setting_search_path("  SET SESSION search_path = b"));
    assert!(!query::is_setting_search_path("select 'set search_path'"));
    assert!(!query::is_setting_search_path("set search_paths to a"));
}

#[test]
fn table_cache_is_cleared_on_disconnect() {
    let (conn, _gw) = connected("7.4");
    let mut info = ResultCache::new();
    info.set_command(Some("SELECT"));
    conn.cache_table_info("public", "orders", info);
    assert_eq!(conn.with_table_info("public", "orders", |r| r.command().map(str::to_string)), Some(Some("SELECT".into())));
    assert_eq!(conn.table_cache_len(), 1);
    conn.disconnect().unwrap();
    assert_eq!(conn.table_cache_len(), 0);
}

#[test]
fn legacy_rows_end_to_end() {
    let (conn, gw) = connected("6.4");
    let stmt = conn.alloc_statement().unwrap();
    let mut resp = encode_row_description(&[FieldInfo::new("id", 23, 4, -1), text_column("name")]);
    resp.extend(encode_tuple(ProtocolGeneration::V64, false, &[Some(&b"1"[..]), Some(&b"ann"[..])]));
    resp.extend(encode_tuple(ProtocolGeneration::V64, false, &[Some(&b"2"[..]), None]));
    resp.extend(encode_tuple(ProtocolGeneration::V64, false, &[Some(&b"3"[..]), Some(&b"cy"[..])]));
    resp.extend(complete("SELECT"));
    gw.push_input(&resp);

    stmt.exec_direct("select id, name from people").unwrap();
    let (count, curs, status) = stmt.with_result(|r| (r.row_count(), r.curs_tuple(), r.status())).unwrap();
    assert_eq!((count, curs, status), (3, 2, ResultStatus::TuplesOk));
    assert!(sent(&gw).starts_with("Qselect id, name from people\0"));

    let mut names = Vec::new();
    while let Some(row) = stmt.fetch().unwrap() {
        names.push(row[1].as_str().map(|s| s.into_owned()));
    }
    assert_eq!(names, vec![Some("ann".to_string()), None, Some("cy".to_string())]);

    conn.disconnect().unwrap();
    assert_eq!(conn.cursors(), 0);
    assert_eq!(conn.statement_count(), 0);
    assert!(!stmt.has_result());
}

#[test]
fn multiple_results_chain_in_order() {
    let (conn, gw) = connected("7.4");
    let mut resp = encode_cstring_message(tags::COMMAND_COMPLETE, "INSERT 0 1");
    resp.extend(rows(ProtocolGeneration::V74, &["42"], "SELECT"));
    gw.push_input(&resp);
    let res = conn.send_query("insert into t values (42); select v from t").unwrap();
    assert_eq!(res.command(), Some("INSERT 0 1"));
    assert_eq!(res.status(), ResultStatus::CommandOk);
    assert_eq!(res.successors().len(), 1);
    let next = &res.successors()[0];
    assert_eq!(next.status(), ResultStatus::TuplesOk);
    assert_eq!(next.row(0).unwrap()[0].as_str().as_deref(), Some("42"));
    assert_eq!(res.chain().count(), 2);
}

#[test]
fn server_error_is_pending_on_the_connection() {
    let (conn, gw) = connected("7.4");
    let mut resp = encode_cstring_message(tags::ERROR, "relation \"nope\" does not exist");
    resp.extend(ready());
    gw.push_input(&resp);
    let err = conn.send_query("select * from nope").unwrap_err();
    assert!(matches!(err, DriverError::Server { .. }));
    let pending = conn.get_error().unwrap();
    assert_eq!(pending.code(), codes::CONNECTION_SERVER_REPORTED_ERROR);
    assert!(pending.message().contains("nope"));
    assert_eq!(conn.status(), ConnStatus::Connected);
}

fn windowed() -> (Arc<Connection>, MemoryTransport) {
    connect_over(ConnSettings { use_declare_fetch: Some(true), fetch_size: Some(2), ..settings("7.4") })
}

#[test]
fn windowed_fetch_refills_from_the_cursor() {
    let (conn, gw) = windowed();
    let stmt = conn.alloc_statement().unwrap();
    gw.push_input(&complete("DECLARE CURSOR"));
    gw.push_input(&rows(ProtocolGeneration::V74, &["a", "b"], "FETCH 2"));
    stmt.exec_direct("select v from t").unwrap();
    let name = stmt.cursor_name();
    let out = sent(&gw);
    assert!(out.contains(&format!("declare \"{}\" cursor for select v from t", name)));
    assert!(out.contains(&format!("fetch 2 in \"{}\"", name)));
    assert_eq!(conn.cursors(), 1);
    assert_eq!(stmt.result_cursor(), Some(name.clone()));

    gw.push_input(&rows(ProtocolGeneration::V74, &["c"], "FETCH 1"));
    let mut seen = Vec::new();
    while let Some(row) = stmt.fetch().unwrap() {
        seen.push(row[0].as_str().unwrap().into_owned());
    }
    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(stmt.with_result(|r| (r.window_start(), r.reached_eof(), r.curs_tuple())), Some((2, true, 2)));

    gw.push_input(&complete("CLOSE CURSOR"));
    stmt.close_cursor().unwrap();
    assert!(sent(&gw).contains(&format!("close \"{}\"", name)));
    assert_eq!(conn.cursors(), 0);
}

#[test]
fn cursor_names_are_unique_per_connection() {
    let (conn, gw) = windowed();
    let a = conn.alloc_statement().unwrap();
    let b = conn.alloc_statement().unwrap();
    gw.push_input(&complete("DECLARE CURSOR"));
    gw.push_input(&rows(ProtocolGeneration::V74, &["a"], "FETCH 1"));
    a.exec_direct("select v from t").unwrap();
    let err = b.set_cursor_name(&a.cursor_name()).unwrap_err();
    assert_eq!(err.code(), codes::STMT_INVALID_CURSOR_NAME);
    assert_eq!(conn.cursor_count(), 1);
}

#[test]
fn transaction_end_closes_plain_cursors() {
    let (conn, gw) = windowed();
    let stmt = conn.alloc_statement().unwrap();
    gw.push_input(&complete("DECLARE CURSOR"));
    gw.push_input(&rows(ProtocolGeneration::V74, &["a", "b"], "FETCH 2"));
    stmt.exec_direct("select v from t").unwrap();
    gw.take_output();

    conn.clear_cursors(false);
    assert_eq!(conn.cursors(), 0);
    assert_eq!(stmt.result_cursor(), None);
    assert!(gw.take_output().is_empty());
}

#[test]
fn holdable_cursors_are_checked_once() {
    let (conn, gw) = windowed();
    let stmt = conn.alloc_statement().unwrap();
    stmt.set_options(crate::statement::StatementOptions { with_hold: true, ..Default::default() });
    gw.push_input(&complete("DECLARE CURSOR"));
    gw.push_input(&rows(ProtocolGeneration::V74, &["a", "b"], "FETCH 2"));
    stmt.exec_direct("select v from t").unwrap();
    assert!(sent(&gw).contains("cursor with hold for"));

    gw.push_input(&complete("MOVE 0"));
    conn.clear_cursors(false);
    assert!(sent(&gw).contains("MOVE 0 in"));
    assert_eq!(conn.cursors(), 1);
    assert_eq!(stmt.with_result(|r| r.is_permanent()), Some(true));

    // permanent now: an abort keeps it and nothing is sent
    conn.clear_cursors(true);
    assert_eq!(conn.cursors(), 1);
    assert!(gw.take_output().is_empty());
}

#[test]
fn freeing_a_statement_queues_its_cursor() {
    let (conn, gw) = windowed();
    let stmt = conn.alloc_statement().unwrap();
    gw.push_input(&complete("DECLARE CURSOR"));
    gw.push_input(&rows(ProtocolGeneration::V74, &["a", "b"], "FETCH 2"));
    stmt.exec_direct("select v from t").unwrap();
    let name = stmt.cursor_name();
    conn.free_statement(&stmt).unwrap();
    assert_eq!(conn.pending_discards(), vec![format!("p{}", name)]);
    assert_eq!(conn.cursors(), 0);
    assert!(!stmt.is_attached());

    gw.take_output();
    gw.push_input(&complete("CLOSE CURSOR"));
    conn.disconnect().unwrap();
    let out = sent(&gw);
    assert!(out.contains(&format!("CLOSE \"{}\"", name)));
    assert!(out.ends_with('X'));
}

#[test]
fn removal_is_refused_while_the_statement_executes() {
    let conn = Connection::create();
    let s = conn.alloc_statement().unwrap();
    s.force_executing(true);
    assert!(matches!(conn.remove_statement(&s), Err(DriverError::Busy { .. })));
    assert_eq!(conn.statement_count(), 1);
    s.force_executing(false);
    conn.remove_statement(&s).unwrap();
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn undecodable_row_drops_the_session() {
    let (conn, gw) = connected("7.4");
    let stmt = conn.alloc_statement().unwrap();
    let mut resp = encode_row_description(&[text_column("v")]);
    resp.push(tags::TEXT_ROW);
    resp.extend_from_slice(&(crate::wire::decoder::MAX_FIELD_LEN + 1).to_be_bytes());
    resp.extend(encode_tuple(ProtocolGeneration::V74, false, &[Some(&b"stale"[..])]));
    resp.extend(complete("SELECT 2"));
    gw.push_input(&resp);

    let err = stmt.exec_direct("select v from t").unwrap_err();
    assert!(matches!(err, DriverError::BadResponse { .. }));
    assert_eq!(conn.status(), ConnStatus::NotConnected);
    assert_eq!(stmt.with_result(|r| (r.status(), r.row_count())), Some((ResultStatus::BadResponse, 0)));
    assert_eq!(conn.get_error().map(|e| e.code()), Some(codes::CONNECTION_BACKEND_CRAZY));

    // a well-formed reply queued behind the leftovers is never read as the next response
    gw.push_input(&rows(ProtocolGeneration::V74, &["fresh"], "SELECT 1"));
    let err = conn.send_query("select v from t").unwrap_err();
    assert!(matches!(err, DriverError::Communication { .. }));
    assert_eq!(err.code(), codes::CONNECTION_SERVER_NOT_REACHED);
    assert!(stmt.exec_direct("select v from t").is_err());
    assert_eq!(stmt.with_result(|r| r.row_count()), Some(0));

    conn.disconnect().unwrap();
    assert_eq!(conn.statement_count(), 0);
}

#[test]
fn row_before_description_drops_the_session() {
    let (conn, gw) = connected("7.4");
    let mut resp = encode_tuple(ProtocolGeneration::V74, false, &[Some(&b"x"[..])]);
    resp.extend(complete("SELECT 1"));
    gw.push_input(&resp);
    assert!(matches!(conn.send_query("select v from t"), Err(DriverError::BadResponse { .. })));
    assert_eq!(conn.status(), ConnStatus::NotConnected);
}

fn keyed() -> (Arc<Connection>, MemoryTransport, Arc<Statement>) {
    let (conn, gw) = connect_over(ConnSettings { allow_keyset: Some(true), ..settings("7.4") });
    let stmt = conn.alloc_statement().unwrap();
    stmt.set_options(crate::statement::StatementOptions { use_keyset: true, ..Default::default() });
    (conn, gw, stmt)
}

#[test]
fn keyset_select_keeps_its_visible_columns() {
    let (_conn, gw, stmt) = keyed();
    let mut resp = encode_row_description(&[
        text_column("a"),
        text_column("b"),
        FieldInfo::new("ctid", 27, 6, -1),
        FieldInfo::new("oid", 26, 4, -1),
    ]);
    resp.extend(encode_tuple(ProtocolGeneration::V74, false, &[Some(&b"1"[..]), Some(&b"x"[..]), Some(&b"(0,3)"[..]), Some(&b"17"[..])]));
    resp.extend(complete("SELECT 1"));
    gw.push_input(&resp);

    stmt.exec_direct("select a, b from t").unwrap();
    assert!(sent(&gw).contains("select a, b, ctid, oid from t\0"));
    stmt.with_result(|r| {
        assert_eq!(r.num_fields(), 2);
        assert_eq!(r.num_key_fields(), 2);
        assert_eq!(r.row(0).unwrap()[1].as_str().as_deref(), Some("x"));
        let k = r.key(0).unwrap();
        assert_eq!((k.block, k.offset, k.oid), (0, 3, 17));
    }).unwrap();
}

#[test]
fn keyset_needs_identity_columns_in_the_reply() {
    let (_conn, gw, stmt) = keyed();
    let mut resp = encode_row_description(&[text_column("a"), text_column("b")]);
    resp.extend(encode_tuple(ProtocolGeneration::V74, false, &[Some(&b"1"[..]), Some(&b"x"[..])]));
    resp.extend(complete("SELECT 1"));
    gw.push_input(&resp);

    stmt.exec_direct("select a, b from t").unwrap();
    assert_eq!(stmt.with_result(|r| (r.num_fields(), r.has_keyset(), r.row_count())), Some((2, false, 1)));
}

#[test]
fn keyset_leaves_other_statements_alone() {
    let (_conn, gw, stmt) = keyed();
    gw.push_input(&complete("UPDATE 1"));
    stmt.exec_direct("update t set a = 1").unwrap();
    let out = sent(&gw);
    assert!(out.contains("update t set a = 1\0"));
    assert!(!out.contains("ctid"));
}
