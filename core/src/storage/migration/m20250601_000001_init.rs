use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

use crate::storage::schema::{PredictionRequests, PredictionResults};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(PredictionRequests::Table)
                    .if_not_exists()
                    .col(pk_col(backend, PredictionRequests::Id))
                    .col(
                        ColumnDef::new(PredictionRequests::RequestId)
                            .string_len(36)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(PredictionRequests::ModelName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PredictionRequests::Source).string().not_null())
                    .col(
                        ColumnDef::new(PredictionRequests::Age)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PredictionRequests::RevenuMensuel)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PredictionRequests::AnneesDansLEntreprise)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PredictionRequests::FrequenceDeplacement)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PredictionRequests::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PredictionRequests::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(PredictionRequests::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PredictionRequests::UpdatedAt).big_integer().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_prediction_requests_status_created")
                    .table(PredictionRequests::Table)
                    .col(PredictionRequests::Status)
                    .col(PredictionRequests::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PredictionResults::Table)
                    .if_not_exists()
                    .col(pk_col(backend, PredictionResults::Id))
                    .col(
                        ColumnDef::new(PredictionResults::RequestId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(PredictionResults::Prediction)
                            .small_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PredictionResults::Probability)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PredictionResults::ModelName).string().not_null())
                    .col(
                        ColumnDef::new(PredictionResults::ModelVersion)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PredictionResults::LatencyMs).double().null())
                    .col(
                        ColumnDef::new(PredictionResults::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_prediction_results_request")
                            .from(PredictionResults::Table, PredictionResults::RequestId)
                            .to(PredictionRequests::Table, PredictionRequests::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_prediction_results_created")
                    .table(PredictionResults::Table)
                    .col(PredictionResults::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PredictionResults::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PredictionRequests::Table).to_owned())
            .await
    }
}

// SQLite only treats INTEGER PRIMARY KEY as a rowid alias.
fn pk_col(backend: DatabaseBackend, col: impl IntoIden) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Sqlite => {
            col_def.integer();
        }
        _ => {
            col_def.big_integer();
        }
    }
    col_def.not_null().auto_increment().primary_key();
    col_def.to_owned()
}
