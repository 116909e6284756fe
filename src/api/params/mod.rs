pub mod generate_params;
