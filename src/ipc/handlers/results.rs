use crate::grading;
use crate::ipc::handlers::setup::{self, SetupSection};
use crate::ipc::helpers::{
    course_ref, id_exists, new_id, now_iso, required_str, student_ref, term_ref, with_conn,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn score_component(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    let v = params
        .get(key)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    v.as_f64().ok_or_else(|| HandlerErr {
        code: "invalid_score",
        message: format!("{} must be a number", key),
        details: Some(json!({ "field": key })),
    })
}

fn require_registration(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    term_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM course_registrations
             WHERE student_id = ? AND course_id = ? AND term_id = ?",
            (student_id, course_id, term_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if found.is_none() {
        return Err(HandlerErr::invalid_state(
            "student is not registered for this course in this term",
        ));
    }
    Ok(())
}

fn upsert_score(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    session_id: &str,
    term_id: &str,
    ca: f64,
    midterm: f64,
    exam: f64,
) -> Result<(), HandlerErr> {
    let now = now_iso();
    conn.execute(
        "INSERT INTO score_entries(id, student_id, course_id, session_id, term_id, ca, midterm, exam, entered_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id, term_id) DO UPDATE SET
             ca = excluded.ca,
             midterm = excluded.midterm,
             exam = excluded.exam,
             updated_at = excluded.updated_at",
        (
            new_id(),
            student_id,
            course_id,
            session_id,
            term_id,
            ca,
            midterm,
            exam,
            &now,
            &now,
        ),
    )
    .map_err(HandlerErr::db_update)?;
    Ok(())
}

fn enter_score(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    let term_id = required_str(params, "termId")?;
    student_ref(conn, &student_id)?;
    course_ref(conn, &course_id)?;
    let term = term_ref(conn, &term_id)?;
    require_registration(conn, &student_id, &course_id, &term_id)?;

    let ca = score_component(params, "ca")?;
    let midterm = score_component(params, "midterm")?;
    let exam = score_component(params, "exam")?;
    // Validation happens before any write; a bad component never lands.
    let total = grading::compute_total(ca, midterm, exam)?;
    let grade = grading::grade_from_total(total);

    upsert_score(
        conn,
        &student_id,
        &course_id,
        &term.session_id,
        &term_id,
        ca,
        midterm,
        exam,
    )?;

    Ok(json!({
        "total": total,
        "grade": grade.as_str(),
        "remark": grade.remark(),
    }))
}

/// All-or-nothing sheet entry: every row is validated before the first
/// write, and all rows go in one transaction.
fn bulk_enter_scores(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let term_id = required_str(params, "termId")?;
    course_ref(conn, &course_id)?;
    let term = term_ref(conn, &term_id)?;

    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }

    let mut validated: Vec<(String, f64, f64, f64)> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let student_id = required_str(entry, "studentId").map_err(|mut e| {
            e.message = format!("entries[{}]: {}", i, e.message);
            e
        })?;
        student_ref(conn, &student_id)?;
        require_registration(conn, &student_id, &course_id, &term_id)?;
        let ca = score_component(entry, "ca")?;
        let midterm = score_component(entry, "midterm")?;
        let exam = score_component(entry, "exam")?;
        grading::compute_total(ca, midterm, exam).map_err(|e| {
            let mut h = HandlerErr::from(e);
            h.details = Some(json!({
                "index": i,
                "studentId": student_id,
            }));
            h
        })?;
        validated.push((student_id, ca, midterm, exam));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for (student_id, ca, midterm, exam) in &validated {
        upsert_score(
            &tx,
            student_id,
            &course_id,
            &term.session_id,
            &term_id,
            *ca,
            *midterm,
            *exam,
        )?;
    }
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "entered": validated.len() }))
}

struct ScoreRow {
    ca: f64,
    midterm: f64,
    exam: f64,
}

impl ScoreRow {
    fn total(&self) -> f64 {
        self.ca + self.midterm + self.exam
    }
}

fn load_score(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    term_id: &str,
) -> Result<Option<ScoreRow>, HandlerErr> {
    conn.query_row(
        "SELECT ca, midterm, exam FROM score_entries
         WHERE student_id = ? AND course_id = ? AND term_id = ?",
        (student_id, course_id, term_id),
        |r| {
            Ok(ScoreRow {
                ca: r.get(0)?,
                midterm: r.get(1)?,
                exam: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn score_json(score: &ScoreRow) -> Value {
    let total = score.total();
    let grade = grading::grade_from_total(total);
    json!({
        "ca": score.ca,
        "midterm": score.midterm,
        "exam": score.exam,
        "total": total,
        "grade": grade.as_str(),
        "remark": grade.remark(),
    })
}

/// One course's sheet for a term: every registered student with components,
/// total, and grade, plus class average and median over the entered totals.
fn course_sheet(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let term_id = required_str(params, "termId")?;
    let course = course_ref(conn, &course_id)?;
    let term = term_ref(conn, &term_id)?;

    let students: Vec<(String, String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.admission_no, s.last_name || ', ' || s.first_name
                 FROM course_registrations cr
                 JOIN students s ON s.id = cr.student_id
                 WHERE cr.course_id = ? AND cr.term_id = ?
                 ORDER BY s.sort_order, s.last_name, s.first_name",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((&course_id, &term_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let mut rows = Vec::with_capacity(students.len());
    let mut totals: Vec<f64> = Vec::new();
    for (student_id, admission_no, name) in &students {
        let score = load_score(conn, student_id, &course_id, &term_id)?;
        let mut row = json!({
            "studentId": student_id,
            "admissionNo": admission_no,
            "studentName": name,
            "score": Value::Null,
        });
        if let Some(score) = score {
            totals.push(score.total());
            row["score"] = score_json(&score);
        }
        rows.push(row);
    }

    Ok(json!({
        "courseId": course.id,
        "courseCode": course.code,
        "courseName": course.name,
        "termId": term.id,
        "termName": term.name,
        "sessionName": term.session_name,
        "rows": rows,
        "entered": totals.len(),
        "registered": students.len(),
        "classAverage": grading::mean(&totals),
        "classMedian": grading::median(&totals),
    }))
}

/// One student's term sheet: every registered course with total and grade,
/// the overall average, and a per-grade distribution.
fn student_sheet(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let term_id = required_str(params, "termId")?;
    let student = student_ref(conn, &student_id)?;
    let term = term_ref(conn, &term_id)?;

    let courses: Vec<(String, String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.code, c.name
                 FROM course_registrations cr
                 JOIN courses c ON c.id = cr.course_id
                 WHERE cr.student_id = ? AND cr.term_id = ?
                 ORDER BY c.sort_order, c.code",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map((&student_id, &term_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let mut rows = Vec::with_capacity(courses.len());
    let mut totals: Vec<f64> = Vec::new();
    let mut passed = 0usize;
    let mut distribution: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (course_id, code, name) in &courses {
        let score = load_score(conn, &student_id, course_id, &term_id)?;
        let mut row = json!({
            "courseId": course_id,
            "courseCode": code,
            "courseName": name,
            "score": Value::Null,
        });
        if let Some(score) = score {
            let total = score.total();
            totals.push(total);
            let grade = grading::grade_from_total(total);
            if grade.is_pass() {
                passed += 1;
            }
            *distribution.entry(grade.as_str()).or_insert(0) += 1;
            row["score"] = score_json(&score);
        }
        rows.push(row);
    }

    Ok(json!({
        "studentId": student.id,
        "studentName": student.display_name,
        "admissionNo": student.admission_no,
        "termId": term.id,
        "termName": term.name,
        "sessionName": term.session_name,
        "rows": rows,
        "coursesEntered": totals.len(),
        "coursesRegistered": courses.len(),
        "coursesPassed": passed,
        "average": grading::mean(&totals),
        "gradeDistribution": distribution,
    }))
}

/// The class broadsheet: a student-by-course matrix of totals, per-student
/// averages, and dense class positions when the grading setup shows them.
fn broadsheet(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let term_id = required_str(params, "termId")?;
    if !id_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let term = term_ref(conn, &term_id)?;

    let courses: Vec<(String, String)> = {
        let mut stmt = conn
            .prepare("SELECT id, code FROM courses WHERE class_id = ? ORDER BY sort_order, code")
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([&class_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let students: Vec<(String, String, String)> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, admission_no, last_name || ', ' || first_name
                 FROM students
                 WHERE class_id = ? AND active = 1
                 ORDER BY sort_order, last_name, first_name",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
    };

    let honour_roll_min = setup::f64_field(conn, SetupSection::Grading, "honourRollMin", 70.0);

    let mut rows = Vec::with_capacity(students.len());
    let mut averages: Vec<f64> = Vec::new();
    let mut averaged_indices: Vec<usize> = Vec::new();
    for (idx, (student_id, admission_no, name)) in students.iter().enumerate() {
        let mut cells = serde_json::Map::new();
        let mut totals: Vec<f64> = Vec::new();
        for (course_id, code) in &courses {
            match load_score(conn, student_id, course_id, &term_id)? {
                Some(score) => {
                    let total = score.total();
                    totals.push(total);
                    cells.insert(code.clone(), json!(total));
                }
                None => {
                    cells.insert(code.clone(), Value::Null);
                }
            }
        }
        let average = grading::mean(&totals);
        if let Some(avg) = average {
            averages.push(avg);
            averaged_indices.push(idx);
        }
        rows.push(json!({
            "studentId": student_id,
            "admissionNo": admission_no,
            "studentName": name,
            "totals": cells,
            "coursesEntered": totals.len(),
            "average": average,
            "honourRoll": average.map(|a| a >= honour_roll_min).unwrap_or(false),
            "position": Value::Null,
        }));
    }

    let show_positions = setup::bool_field(conn, SetupSection::Grading, "showPositions", true);
    if show_positions {
        // Students without any entered score stay unranked.
        let positions = grading::dense_positions(&averages);
        for (slot, row_idx) in averaged_indices.iter().enumerate() {
            rows[*row_idx]["position"] = json!(positions[slot]);
        }
    }

    Ok(json!({
        "classId": class_id,
        "termId": term.id,
        "termName": term.name,
        "sessionName": term.session_name,
        "courses": courses
            .iter()
            .map(|(id, code)| json!({ "id": id, "code": code }))
            .collect::<Vec<_>>(),
        "rows": rows,
        "showPositions": show_positions,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.enterScore" => Some(with_conn(state, req, enter_score)),
        "results.bulkEnterScores" => Some(with_conn(state, req, bulk_enter_scores)),
        "results.courseSheet" => Some(with_conn(state, req, course_sheet)),
        "results.studentSheet" => Some(with_conn(state, req, student_sheet)),
        "results.broadsheet" => Some(with_conn(state, req, broadsheet)),
        _ => None,
    }
}
