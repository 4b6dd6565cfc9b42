//! SQLite implementation of [`RecordStore`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

use super::{
    AppointmentRecord, AppointmentStatus, AppointmentUpdate, CallEnded, CallLog, ContactRecord, ContactUpsert, DailyMetrics,
    MetricsDelta, RecordStore,
};
use crate::Error;
use crate::db::Database;
use crate::identity::IdentityKey;

#[derive(Debug, Clone)]
pub struct SqliteRecords {
    db: Database,
}

impl SqliteRecords {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_status(raw: &str) -> AppointmentStatus {
    match raw {
        "cancelled" => AppointmentStatus::Cancelled,
        _ => AppointmentStatus::Scheduled,
    }
}

fn contact_from_row(row: &tokio_rusqlite::rusqlite::Row<'_>) -> tokio_rusqlite::rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        phone_number: row.get(0)?,
        name: row.get(1)?,
        ghl_contact_id: row.get(2)?,
        last_call_at: row.get(3)?,
        total_calls: row.get(4)?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecords {
    async fn get_contact(&self, identity: &IdentityKey) -> Result<Option<ContactRecord>, Error> {
        let phone = identity.as_str().to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Option<ContactRecord>, Error> {
                let contact = conn
                    .query_row(
                        "SELECT phone_number, name, ghl_contact_id, last_call_at, total_calls
                        FROM contacts WHERE phone_number = ?1",
                        params![phone],
                        contact_from_row,
                    )
                    .optional()?;
                Ok(contact)
            })
            .await
            .map_err(Error::from)
    }

    async fn upsert_contact(&self, contact: &ContactUpsert) -> Result<(), Error> {
        let contact = contact.clone();
        let now = Utc::now().to_rfc3339();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO contacts (phone_number, name, ghl_contact_id, last_call_at, total_calls, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                    ON CONFLICT(phone_number) DO UPDATE SET
                        name = COALESCE(excluded.name, contacts.name),
                        ghl_contact_id = COALESCE(excluded.ghl_contact_id, contacts.ghl_contact_id),
                        last_call_at = COALESCE(excluded.last_call_at, contacts.last_call_at),
                        total_calls = contacts.total_calls + excluded.total_calls,
                        updated_at = excluded.updated_at",
                    params![
                        contact.phone_number,
                        contact.name,
                        contact.ghl_contact_id,
                        contact.last_call_at.map(|t| t.to_rfc3339()),
                        i64::from(contact.count_call),
                        now,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn contact_by_crm_id(&self, ghl_contact_id: &str) -> Result<Option<ContactRecord>, Error> {
        let crm_id = ghl_contact_id.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Option<ContactRecord>, Error> {
                let contact = conn
                    .query_row(
                        "SELECT phone_number, name, ghl_contact_id, last_call_at, total_calls
                        FROM contacts WHERE ghl_contact_id = ?1
                        ORDER BY updated_at DESC LIMIT 1",
                        params![crm_id],
                        contact_from_row,
                    )
                    .optional()?;
                Ok(contact)
            })
            .await
            .map_err(Error::from)
    }

    async fn log_call(&self, call: &CallLog) -> Result<(), Error> {
        let call = call.clone();
        let call_id = call.call_id.clone();
        let metadata = serde_json::to_string(&call.metadata)?;
        let now = Utc::now().to_rfc3339();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO call_logs (call_id, phone_number, call_started_at, metadata_json, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(call_id) DO NOTHING",
                    params![call.call_id, call.phone_number, call.call_started_at.to_rfc3339(), metadata, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
        tracing::debug!(%call_id, "logged call");
        Ok(())
    }

    async fn update_call_ended(&self, ended: &CallEnded) -> Result<(), Error> {
        let ended = ended.clone();
        let now = Utc::now().to_rfc3339();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE call_logs SET
                        call_ended_at = ?2,
                        duration_seconds = COALESCE(?3, duration_seconds),
                        outcome = COALESCE(?4, outcome),
                        transcript = COALESCE(?5, transcript),
                        updated_at = ?6
                    WHERE call_id = ?1",
                    params![
                        ended.call_id,
                        ended.call_ended_at.to_rfc3339(),
                        ended.duration_seconds,
                        ended.outcome,
                        ended.transcript,
                        now,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn recent_calls(&self, identity: &IdentityKey, limit: u32) -> Result<Vec<CallLog>, Error> {
        let phone = identity.as_str().to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<CallLog>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT call_id, phone_number, call_started_at, metadata_json
                    FROM call_logs WHERE phone_number = ?1
                    ORDER BY call_started_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![phone, limit], |row| {
                    let started: String = row.get(2)?;
                    let metadata: String = row.get(3)?;
                    Ok(CallLog {
                        call_id: row.get(0)?,
                        phone_number: row.get(1)?,
                        call_started_at: parse_timestamp(&started),
                        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    async fn create_appointment(&self, appointment: &AppointmentRecord) -> Result<(), Error> {
        let appointment = appointment.clone();
        let now = Utc::now().to_rfc3339();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO appointments
                        (ghl_appointment_id, phone_number, call_id, calendar_id, scheduled_at, status, notes,
                         created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    ON CONFLICT(ghl_appointment_id) DO UPDATE SET
                        calendar_id = COALESCE(excluded.calendar_id, appointments.calendar_id),
                        scheduled_at = excluded.scheduled_at,
                        status = excluded.status,
                        notes = COALESCE(excluded.notes, appointments.notes),
                        updated_at = excluded.updated_at",
                    params![
                        appointment.ghl_appointment_id,
                        appointment.phone_number,
                        appointment.call_id,
                        appointment.calendar_id,
                        appointment.scheduled_at,
                        appointment.status.as_str(),
                        appointment.notes,
                        now,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn find_appointment(&self, ghl_appointment_id: &str) -> Result<Option<AppointmentRecord>, Error> {
        let event_id = ghl_appointment_id.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Option<AppointmentRecord>, Error> {
                let appointment = conn
                    .query_row(
                        "SELECT ghl_appointment_id, phone_number, call_id, calendar_id, scheduled_at, status, notes
                        FROM appointments WHERE ghl_appointment_id = ?1",
                        params![event_id],
                        |row| {
                            let status: String = row.get(5)?;
                            Ok(AppointmentRecord {
                                ghl_appointment_id: row.get(0)?,
                                phone_number: row.get(1)?,
                                call_id: row.get(2)?,
                                calendar_id: row.get(3)?,
                                scheduled_at: row.get(4)?,
                                status: parse_status(&status),
                                notes: row.get(6)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(appointment)
            })
            .await
            .map_err(Error::from)
    }

    async fn update_appointment_status(&self, update: &AppointmentUpdate) -> Result<(), Error> {
        let update = update.clone();
        let now = Utc::now().to_rfc3339();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "UPDATE appointments SET
                        status = ?2,
                        scheduled_at = COALESCE(?3, scheduled_at),
                        notes = COALESCE(?4, notes),
                        updated_at = ?5
                    WHERE ghl_appointment_id = ?1",
                    params![update.ghl_appointment_id, update.status.as_str(), update.scheduled_at, update.notes, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn update_daily_metrics(&self, date: NaiveDate, delta: &MetricsDelta) -> Result<(), Error> {
        let delta = *delta;
        let date = date.to_string();
        let now = Utc::now().to_rfc3339();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO daily_metrics
                        (date, total_calls, appointments_booked, transfers, conversion_rate, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4,
                        CASE WHEN ?2 > 0 THEN ROUND(?3 * 100.0 / ?2, 2) ELSE 0 END,
                        ?5, ?5)
                    ON CONFLICT(date) DO UPDATE SET
                        total_calls = daily_metrics.total_calls + excluded.total_calls,
                        appointments_booked = daily_metrics.appointments_booked + excluded.appointments_booked,
                        transfers = daily_metrics.transfers + excluded.transfers,
                        conversion_rate = CASE
                            WHEN daily_metrics.total_calls + excluded.total_calls > 0
                            THEN ROUND(
                                (daily_metrics.appointments_booked + excluded.appointments_booked) * 100.0
                                    / (daily_metrics.total_calls + excluded.total_calls),
                                2)
                            ELSE 0 END,
                        updated_at = excluded.updated_at",
                    params![date, delta.total_calls, delta.appointments_booked, delta.transfers, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn daily_metrics(&self, date: NaiveDate) -> Result<Option<DailyMetrics>, Error> {
        let key = date.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<Option<DailyMetrics>, Error> {
                let metrics = conn
                    .query_row(
                        "SELECT total_calls, appointments_booked, transfers, conversion_rate
                        FROM daily_metrics WHERE date = ?1",
                        params![key],
                        |row| {
                            Ok(DailyMetrics {
                                date,
                                total_calls: row.get(0)?,
                                appointments_booked: row.get(1)?,
                                transfers: row.get(2)?,
                                conversion_rate: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(metrics)
            })
            .await
            .map_err(Error::from)
    }
}
