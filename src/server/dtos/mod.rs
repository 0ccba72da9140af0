pub mod health_dto;
pub mod url_dto;
