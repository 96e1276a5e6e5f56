pub mod sweep_service;
