use sea_orm::DeriveIden;

#[derive(DeriveIden, Clone, Copy)]
pub enum PredictionRequests {
    Table,
    Id,
    RequestId,
    ModelName,
    Source,
    Age,
    RevenuMensuel,
    #[sea_orm(iden = "annees_dans_l_entreprise")]
    AnneesDansLEntreprise,
    FrequenceDeplacement,
    Status,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
pub enum PredictionResults {
    Table,
    Id,
    RequestId,
    Prediction,
    Probability,
    ModelName,
    ModelVersion,
    LatencyMs,
    CreatedAt,
}

pub fn col_name(column: impl sea_orm::sea_query::Iden) -> String {
    column.to_string()
}
